//!
//! client_secret*.json の読み込み
//!

use crate::info;

/// 手動で認可コードを入力する場合のリダイレクト URI
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// 既定の client_secret ファイル名
const DEFAULT_CLIENT_SECRET_FILE: &str = "client_secret.json";

/// Google Cloud Console からダウンロードした client_secret の中身
#[derive(serde_derive::Serialize, serde_derive::Deserialize, Debug, Clone)]
pub struct ClientCredentials {
	pub client_id: String,
	pub client_secret: String,
	#[serde(default)]
	pub redirect_uris: Vec<String>,
	pub auth_uri: String,
	pub token_uri: String,
}

/// client_secret ファイルのトップレベル
///
/// デスクトップアプリは `installed`、ウェブアプリは `web` を持ちます。
#[derive(serde_derive::Serialize, serde_derive::Deserialize, Debug)]
pub struct ClientSecret {
	pub installed: Option<ClientCredentials>,
	pub web: Option<ClientCredentials>,
}

impl ClientSecret {
	fn credentials(&self) -> Option<&ClientCredentials> {
		return self.installed.as_ref().or(self.web.as_ref());
	}
}

/// 認可手続きの設定
///
/// 起動時に一度だけ作成され、以降は変更されません。
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationConfig {
	pub client_id: String,
	pub client_secret: String,
	pub scopes: Vec<String>,
	/// 認可エンドポイント
	pub auth_uri: String,
	/// トークンエンドポイント
	pub token_uri: String,
	/// client_secret に登録されたリダイレクト URI
	pub redirect_uri: String,
}

/// client_secret*.json を列挙します。
///
/// # Arguments
/// * `location` - 検索するディレクトリ
fn enumerate_client_secret(location: &std::path::Path) -> Result<Vec<std::path::PathBuf>, Box<dyn std::error::Error>> {
	let mut result = vec![];
	for entry in std::fs::read_dir(location)? {
		let path = entry?.path();
		if !path.is_file() {
			continue;
		}
		let file_name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
		if file_name.starts_with("client_secret") && file_name.ends_with(".json") {
			result.push(path);
		}
	}
	result.sort();
	return Ok(result);
}

/// コンフィギュレーションを行います。
///
/// # Arguments
/// * `path` - 明示された client_secret ファイル。`None` の場合はカレントディレクトリを探します。
/// * `scopes` - 要求するスコープ
pub fn configure(path: Option<&str>, scopes: &[&str]) -> Result<AuthorizationConfig, Box<dyn std::error::Error>> {
	if let Some(path) = path {
		let client_secret = parse_client_secret(std::path::Path::new(path))?;
		return to_authorization_config(&client_secret, scopes);
	}

	let location = std::path::Path::new(".");
	let default_file = location.join(DEFAULT_CLIENT_SECRET_FILE);
	if default_file.is_file() {
		let client_secret = parse_client_secret(&default_file)?;
		return to_authorization_config(&client_secret, scopes);
	}

	let files = enumerate_client_secret(location)?;
	if files.len() == 0 {
		info!("client_secret*.json が見つかりません。");
		return Err("Unable to read client secret file: no client_secret*.json found".into());
	}

	for file in files {
		let client_secret = match parse_client_secret(&file) {
			Ok(client_secret) => client_secret,
			Err(e) => {
				info!("パースエラー {:?} ({})", file, e);
				continue;
			}
		};
		if let Ok(config) = to_authorization_config(&client_secret, scopes) {
			info!("client_secret を読み込みました。{:?}", file);
			return Ok(config);
		}
	}

	return Err("Unable to parse client secret file to config".into());
}

/// client_secret*.json をパースします。
///
/// # Arguments
/// * `path` - ファイルパス
pub fn parse_client_secret(path: &std::path::Path) -> Result<ClientSecret, Box<dyn std::error::Error>> {
	let file = std::fs::File::open(path).map_err(|e| format!("Unable to read client secret file {}: {}", path.display(), e))?;
	let reader = std::io::BufReader::new(file);
	let client_secret: ClientSecret =
		serde_json::from_reader(reader).map_err(|e| format!("Unable to parse client secret file to config: {}", e))?;
	return Ok(client_secret);
}

/// client_secret から認可手続きの設定を作成します。
pub fn to_authorization_config(client_secret: &ClientSecret, scopes: &[&str]) -> Result<AuthorizationConfig, Box<dyn std::error::Error>> {
	let credentials = client_secret.credentials().ok_or("Unable to parse client secret file to config: missing \"installed\" or \"web\"")?;
	if credentials.client_id.is_empty() || credentials.client_secret.is_empty() {
		return Err("Unable to parse client secret file to config: empty client_id or client_secret".into());
	}
	if scopes.is_empty() {
		return Err("At least one scope is required".into());
	}

	let redirect_uri = credentials.redirect_uris.first().cloned().unwrap_or_else(|| OOB_REDIRECT_URI.to_string());

	let config = AuthorizationConfig {
		client_id: credentials.client_id.clone(),
		client_secret: credentials.client_secret.clone(),
		scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
		auth_uri: credentials.auth_uri.clone(),
		token_uri: credentials.token_uri.clone(),
		redirect_uri: redirect_uri,
	};
	return Ok(config);
}
