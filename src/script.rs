//!
//! Apps Script Execution API (scripts.run)
//!
//! # References
//! - [Method: scripts.run](https://developers.google.com/apps-script/api/reference/rest/v1/scripts/run)

use crate::info;

/// 既定のエンドポイント
pub const DEFAULT_ENDPOINT: &str = "https://script.googleapis.com";

/// 実行要求
#[derive(serde_derive::Serialize, serde_derive::Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
	/// 実行する関数名
	pub function: String,
	/// 関数に渡す引数
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub parameters: Vec<serde_json::Value>,
	/// 最新の保存版で実行するかどうか。スクリプトの所有者のみ有効です。
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub dev_mode: bool,
}

impl ExecutionRequest {
	pub fn new(function: &str) -> Self {
		return Self {
			function: function.to_string(),
			parameters: vec![],
			dev_mode: false,
		};
	}
}

/// エラーの内容
#[derive(serde_derive::Serialize, serde_derive::Deserialize, Debug, Clone, PartialEq)]
pub struct Status {
	#[serde(default)]
	pub code: i32,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub details: Vec<serde_json::Value>,
}

/// 実行結果
#[derive(serde_derive::Deserialize, Debug)]
pub struct Operation {
	#[serde(default)]
	pub done: bool,
	/// 正常に終了した場合の ExecutionResponse。受け取ったバイト列のまま保持します。
	#[serde(default)]
	pub response: Option<Box<serde_json::value::RawValue>>,
	/// スクリプトが失敗した場合のエラー
	#[serde(default)]
	pub error: Option<Status>,
}

/// スクリプトの実行結果
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
	/// 関数が正常に終了した (応答の JSON テキスト)
	Completed(String),
	/// API は実行したが、関数がエラーを返した
	Failed(Status),
}

impl Operation {
	pub fn outcome(self) -> ExecutionOutcome {
		if let Some(status) = self.error {
			return ExecutionOutcome::Failed(status);
		}
		let response = match self.response {
			Some(raw) => raw.get().to_string(),
			None => "null".to_string(),
		};
		return ExecutionOutcome::Completed(response);
	}
}

/// Apps Script API のクライアント
pub struct ScriptService {
	endpoint: String,
	access_token: String,
	client: reqwest::blocking::Client,
}

impl ScriptService {
	/// # Arguments
	/// * `access_token` - 有効なアクセストークン
	pub fn new(access_token: &str) -> Self {
		return Self::with_endpoint(DEFAULT_ENDPOINT, access_token);
	}

	pub fn with_endpoint(endpoint: &str, access_token: &str) -> Self {
		return Self::with_client(endpoint, access_token, reqwest::blocking::Client::new());
	}

	/// HTTP クライアントを指定して作成します。
	pub fn with_client(endpoint: &str, access_token: &str, client: reqwest::blocking::Client) -> Self {
		return Self {
			endpoint: endpoint.trim_end_matches('/').to_string(),
			access_token: access_token.to_string(),
			client: client,
		};
	}

	/// 関数を実行します。
	///
	/// スクリプトが実行される前に失敗した場合 (通信エラー、認証エラーなど) は `Err` を返します。
	/// 関数自体のエラーは `Ok` の中の `Operation::error` に入ります。
	pub fn run(&self, script_id: &str, request: &ExecutionRequest) -> Result<Operation, Box<dyn std::error::Error>> {
		let url = format!("{}/v1/scripts/{}:run", self.endpoint, script_id);
		info!("SCRIPT> POST {} function: {}", url, request.function);

		let response = self
			.client
			.post(&url)
			.bearer_auth(&self.access_token)
			.json(request)
			.send()
			.map_err(|e| format!("Unable to execute Apps Script function. {}", e))?;

		let status = response.status();
		let text = response.text().map_err(|e| format!("Unable to execute Apps Script function. {}", e))?;
		if !status.is_success() {
			return Err(format!("Unable to execute Apps Script function. {} {}", status, text.trim()).into());
		}

		let operation: Operation =
			serde_json::from_str(&text).map_err(|e| format!("Unable to execute Apps Script function. malformed response: {}", e))?;
		return Ok(operation);
	}
}

/// 関数を実行し、表示する文字列を返します。
///
/// 関数のエラーは致命的ではないので、表示する文字列として返します。
pub fn execute(service: &ScriptService, script_id: &str, function: &str) -> Result<String, Box<dyn std::error::Error>> {
	let request = ExecutionRequest::new(function);
	let operation = service.run(script_id, &request)?;
	return Ok(render(&operation.outcome()));
}

/// 実行結果を表示用の文字列にします。
pub fn render(outcome: &ExecutionOutcome) -> String {
	return match outcome {
		ExecutionOutcome::Completed(response) => response.clone(),
		ExecutionOutcome::Failed(status) => render_error(status),
	};
}

/// スクリプトのエラーを表示用の文字列にします。
///
/// details の先頭には errorMessage と、実行が始まっていればスタックトレースが入っています。
fn render_error(status: &Status) -> String {
	let mut lines = vec![format!("Script error: {} (code {})", status.message, status.code)];

	let detail = match status.details.first() {
		Some(detail) => detail,
		None => return lines.join("\n"),
	};
	if let Some(message) = detail.get("errorMessage").and_then(|v| v.as_str()) {
		let error_type = detail.get("errorType").and_then(|v| v.as_str()).unwrap_or("");
		lines.push(format!("Script error message: {} {}", message, error_type).trim_end().to_string());
	}
	if let Some(elements) = detail.get("scriptStackTraceElements").and_then(|v| v.as_array()) {
		lines.push("Script error stacktrace:".to_string());
		for element in elements {
			let function = element.get("function").and_then(|v| v.as_str()).unwrap_or("?");
			let line_number = element.get("lineNumber").and_then(|v| v.as_i64()).unwrap_or(0);
			lines.push(format!("\t{}: {}", function, line_number));
		}
	}
	return lines.join("\n");
}
