use crate::configuration::AuthorizationConfig;
use crate::credential::CachedCredential;
use crate::errors::CredentialError;
use crate::{info, util};

/// トークンエンドポイントの応答
#[derive(serde_derive::Serialize, serde_derive::Deserialize, Debug)]
pub struct TokenData {
	/// アクセストークン
	pub access_token: String,
	/// アクセス トークンの残りの有効期間（秒）
	#[serde(default)]
	pub expires_in: Option<i64>,
	/// このプロパティは、リクエストに ID スコープ（openid、profile、email など）が含まれる場合にのみ返されます。
	#[serde(default)]
	pub id_token: Option<String>,
	/// 更新トークン。offline アクセスを要求した初回の認可でのみ返されます。
	#[serde(default)]
	pub refresh_token: Option<String>,
	/// access_token によって付与されるアクセス スコープ
	#[serde(default)]
	pub scope: Option<String>,
	/// 常に Bearer
	#[serde(default)]
	pub token_type: String,
}

impl TokenData {
	/// キャッシュ用の資格情報に変換します。残りの有効期間は絶対時刻になります。
	///
	/// 表現できない有効期間はエラーです。
	pub fn into_credential(self, now: chrono::DateTime<chrono::Utc>) -> Result<CachedCredential, CredentialError> {
		let expiry = match self.expires_in {
			Some(seconds) if seconds > 0 => {
				let expiry = chrono::Duration::try_seconds(seconds).and_then(|delta| now.checked_add_signed(delta));
				match expiry {
					Some(expiry) => Some(expiry),
					None => return Err(CredentialError::Exchange(format!("expires_in out of range: {}", seconds))),
				}
			}
			_ => None,
		};
		let credential = CachedCredential {
			access_token: self.access_token,
			token_type: self.token_type,
			refresh_token: self.refresh_token,
			expiry: expiry,
		};
		return Ok(credential);
	}
}

/// トークンエンドポイントのエラー応答
#[derive(serde_derive::Deserialize, Debug)]
struct TokenErrorResponse {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

/// 認可コードをトークンに交換するもの
pub trait TokenExchanger {
	/// # Arguments
	/// * `config` - 認可手続きの設定
	/// * `code` - ユーザーから受け取った認可コード
	/// * `code_verifier` - 認可 URL の code_challenge の元になった値
	/// * `redirect_uri` - 認可 URL で使ったリダイレクト URI
	fn exchange(&self, config: &AuthorizationConfig, code: &str, code_verifier: &str, redirect_uri: &str) -> Result<CachedCredential, CredentialError>;
}

impl<T: TokenExchanger + ?Sized> TokenExchanger for &T {
	fn exchange(&self, config: &AuthorizationConfig, code: &str, code_verifier: &str, redirect_uri: &str) -> Result<CachedCredential, CredentialError> {
		return (**self).exchange(config, code, code_verifier, redirect_uri);
	}
}

/// 認可画面の URL を作成します。
///
/// 更新トークンを受け取るため、offline アクセスを要求します。
pub fn authorization_url(config: &AuthorizationConfig, state: &str, redirect_uri: &str, code_challenge: &str) -> String {
	let scopes = config.scopes.join(" ");
	let query = util::build_query_string(&[
		("access_type", "offline"),
		("client_id", config.client_id.as_str()),
		("redirect_uri", redirect_uri),
		("response_type", "code"),
		("scope", scopes.as_str()),
		("state", state),
		("code_challenge", code_challenge),
		("code_challenge_method", "S256"),
	]);
	let separator = if config.auth_uri.contains("?") { "&" } else { "?" };
	return format!("{}{}{}", config.auth_uri, separator, query);
}

/// Google OAuth 2.0 のトークンエンドポイントとやり取りします。
pub struct GoogleOAuth2 {
	client: reqwest::blocking::Client,
}

impl GoogleOAuth2 {
	/// コンストラクター
	pub fn new() -> Self {
		return Self::with_client(reqwest::blocking::Client::new());
	}

	/// HTTP クライアントを指定して作成します。
	pub fn with_client(client: reqwest::blocking::Client) -> Self {
		return Self { client };
	}

	/// 期限切れのアクセストークンを、可能であれば更新します。
	///
	/// 更新したトークンはキャッシュに書き戻しません。更新トークンが無い場合はそのまま返し、判断をサーバーに任せます。
	pub fn ensure_fresh(&self, config: &AuthorizationConfig, credential: &CachedCredential) -> Result<CachedCredential, CredentialError> {
		if !credential.is_expired(chrono::Utc::now()) {
			return Ok(credential.clone());
		}
		if credential.refresh_token.is_none() {
			info!("アクセストークンは期限切れですが、更新トークンがありません。");
			return Ok(credential.clone());
		}
		return self.refresh(config, credential);
	}

	/// 更新トークンを使って、新しいアクセストークンを取得します。
	///
	/// 応答に更新トークンが含まれない場合は、元の更新トークンを引き継ぎます。
	pub fn refresh(&self, config: &AuthorizationConfig, credential: &CachedCredential) -> Result<CachedCredential, CredentialError> {
		let refresh_token = match &credential.refresh_token {
			Some(refresh_token) if refresh_token != "" => refresh_token,
			_ => return Err(CredentialError::Exchange("no refresh token".to_string())),
		};

		info!("アクセストークンを更新しています...");
		let params = [
			("client_id", config.client_id.as_str()),
			("client_secret", config.client_secret.as_str()),
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token.as_str()),
		];
		let token_data = request_token(&self.client, &config.token_uri, &params)?;

		let mut refreshed = token_data.into_credential(chrono::Utc::now())?;
		if refreshed.refresh_token.is_none() {
			refreshed.refresh_token = credential.refresh_token.clone();
		}
		return Ok(refreshed);
	}
}

impl TokenExchanger for GoogleOAuth2 {
	/// code などを使って、アクセストークンを取得します。
	fn exchange(&self, config: &AuthorizationConfig, code: &str, code_verifier: &str, redirect_uri: &str) -> Result<CachedCredential, CredentialError> {
		let params = [
			("code", code),
			("client_id", config.client_id.as_str()),
			("client_secret", config.client_secret.as_str()),
			("redirect_uri", redirect_uri),
			("grant_type", "authorization_code"),
			("code_verifier", code_verifier),
		];
		let token_data = request_token(&self.client, &config.token_uri, &params)?;
		info!(
			"GOOGLE> token_type: {}, expires_in: {:?}, scope: {:?}, refresh_token: {}",
			token_data.token_type,
			token_data.expires_in,
			token_data.scope,
			if token_data.refresh_token.is_some() { "yes" } else { "no" }
		);

		return token_data.into_credential(chrono::Utc::now());
	}
}

/// トークンエンドポイントにフォームを POST します。
fn request_token(client: &reqwest::blocking::Client, token_uri: &str, params: &[(&str, &str)]) -> Result<TokenData, CredentialError> {
	let (status, text) = util::http_post(client, token_uri, params)?;

	if !(200..300).contains(&status) {
		return Err(CredentialError::Exchange(describe_token_error(status, &text)));
	}

	let token_data: TokenData = serde_json::from_str(&text).map_err(|e| CredentialError::Exchange(format!("malformed token response: {}", e)))?;
	if token_data.access_token == "" {
		return Err(CredentialError::Exchange("server returned empty access_token".to_string()));
	}

	return Ok(token_data);
}

/// エラー応答を人が読める形にします。
fn describe_token_error(status: u16, text: &str) -> String {
	return match serde_json::from_str::<TokenErrorResponse>(text) {
		Ok(response) => match response.error_description {
			Some(description) => format!("{} {}: {}", status, response.error, description),
			None => format!("{} {}", status, response.error),
		},
		Err(_) => format!("{} {}", status, text.trim()),
	};
}

#[cfg(test)]
mod tests {
	use super::*;

	use mockito::Matcher;

	fn config(token_uri: &str) -> AuthorizationConfig {
		return AuthorizationConfig {
			client_id: "client-123".to_string(),
			client_secret: "secret".to_string(),
			scopes: vec!["https://www.googleapis.com/auth/drive".to_string(), "openid".to_string()],
			auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
			token_uri: token_uri.to_string(),
			redirect_uri: "urn:ietf:wg:oauth:2.0:oob".to_string(),
		};
	}

	/// ローカルのモックサーバーに直接つなぐクライアント
	fn oauth() -> GoogleOAuth2 {
		let client = reqwest::blocking::Client::builder().no_proxy().build().unwrap();
		return GoogleOAuth2::with_client(client);
	}

	fn form(pairs: &[(&str, &str)]) -> Matcher {
		let matchers = pairs.iter().map(|(key, value)| Matcher::UrlEncoded(key.to_string(), value.to_string())).collect();
		return Matcher::AllOf(matchers);
	}

	#[test]
	fn authorization_url_carries_client_scope_and_offline_access() {
		let url = authorization_url(&config("https://t"), "state-token", "urn:ietf:wg:oauth:2.0:oob", "challenge");
		assert_eq!(
			url,
			"https://accounts.google.com/o/oauth2/auth?access_type=offline&client_id=client-123\
			&redirect_uri=urn%3Aietf%3Awg%3Aoauth%3A2.0%3Aoob&response_type=code\
			&scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fdrive%20openid&state=state-token\
			&code_challenge=challenge&code_challenge_method=S256"
		);
	}

	#[test]
	fn authorization_url_appends_to_existing_query() {
		let mut c = config("https://t");
		c.auth_uri = "https://example.com/auth?prompt=consent".to_string();
		let url = authorization_url(&c, "s", "http://localhost:15000", "c");
		assert!(url.starts_with("https://example.com/auth?prompt=consent&access_type=offline&"));
	}

	#[test]
	fn token_data_expiry_is_absolute() {
		let now = chrono::Utc::now();
		let token_data: TokenData =
			serde_json::from_str(r#"{"access_token":"ya29.a","expires_in":3599,"refresh_token":"1//r","scope":"s","token_type":"Bearer"}"#).unwrap();
		let credential = token_data.into_credential(now).unwrap();
		assert_eq!(credential.access_token, "ya29.a");
		assert_eq!(credential.refresh_token.as_deref(), Some("1//r"));
		assert_eq!(credential.token_type, "Bearer");
		assert_eq!(credential.expiry, Some(now + chrono::Duration::seconds(3599)));
	}

	#[test]
	fn token_data_without_lifetime_has_no_expiry() {
		let token_data: TokenData = serde_json::from_str(r#"{"access_token":"ya29.a","token_type":"Bearer"}"#).unwrap();
		assert_eq!(token_data.into_credential(chrono::Utc::now()).unwrap().expiry, None);
	}

	#[test]
	fn exchange_posts_authorization_code() {
		let mut server = mockito::Server::new();
		let mock = server
			.mock("POST", "/token")
			.match_header("content-type", "application/x-www-form-urlencoded")
			.match_body(form(&[
				("grant_type", "authorization_code"),
				("code", "4/0Abc"),
				("client_id", "client-123"),
				("client_secret", "secret"),
				("redirect_uri", "urn:ietf:wg:oauth:2.0:oob"),
				("code_verifier", "verifier"),
			]))
			.with_status(200)
			.with_header("content-type", "application/json")
			.with_body(r#"{"access_token":"ya29.fresh","expires_in":3599,"refresh_token":"1//fresh","scope":"https://www.googleapis.com/auth/drive","token_type":"Bearer"}"#)
			.create();
		let c = config(&format!("{}/token", server.url()));

		let credential = oauth().exchange(&c, "4/0Abc", "verifier", "urn:ietf:wg:oauth:2.0:oob").unwrap();

		assert_eq!(credential.access_token, "ya29.fresh");
		assert_eq!(credential.refresh_token.as_deref(), Some("1//fresh"));
		assert!(credential.expiry.is_some());
		mock.assert();
	}

	#[test]
	fn exchange_rejects_bad_code() {
		let mut server = mockito::Server::new();
		let mock = server
			.mock("POST", "/token")
			.with_status(400)
			.with_header("content-type", "application/json")
			.with_body(r#"{"error":"invalid_grant","error_description":"Malformed auth code."}"#)
			.create();
		let c = config(&format!("{}/token", server.url()));

		let err = oauth().exchange(&c, "bogus", "verifier", "urn:ietf:wg:oauth:2.0:oob").unwrap_err();

		match err {
			CredentialError::Exchange(message) => assert_eq!(message, "400 invalid_grant: Malformed auth code."),
			other => panic!("unexpected error: {:?}", other),
		}
		mock.assert();
	}

	#[test]
	fn exchange_rejects_malformed_response() {
		let mut server = mockito::Server::new();
		let mock = server.mock("POST", "/token").with_status(200).with_body("<html>oops</html>").create();
		let c = config(&format!("{}/token", server.url()));

		let err = oauth().exchange(&c, "4/0Abc", "verifier", "urn:ietf:wg:oauth:2.0:oob").unwrap_err();

		assert!(matches!(err, CredentialError::Exchange(_)));
		mock.assert();
	}

	#[test]
	fn exchange_rejects_unrepresentable_lifetime() {
		let mut server = mockito::Server::new();
		let mock = server
			.mock("POST", "/token")
			.with_status(200)
			.with_header("content-type", "application/json")
			.with_body(r#"{"access_token":"a","expires_in":9223372036854775807,"token_type":"Bearer"}"#)
			.create();
		let c = config(&format!("{}/token", server.url()));

		let err = oauth().exchange(&c, "4/0Abc", "verifier", "urn:ietf:wg:oauth:2.0:oob").unwrap_err();

		match err {
			CredentialError::Exchange(message) => assert!(message.contains("expires_in")),
			other => panic!("unexpected error: {:?}", other),
		}
		mock.assert();
	}

	#[test]
	fn exchange_reports_unreachable_server() {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let address = listener.local_addr().unwrap();
		drop(listener);
		let c = config(&format!("http://{}/token", address));

		let err = oauth().exchange(&c, "4/0Abc", "verifier", "urn:ietf:wg:oauth:2.0:oob").unwrap_err();

		assert!(matches!(err, CredentialError::Transport(_)));
	}

	#[test]
	fn refresh_keeps_refresh_token_when_omitted() {
		let mut server = mockito::Server::new();
		let mock = server
			.mock("POST", "/token")
			.match_body(form(&[("grant_type", "refresh_token"), ("refresh_token", "1//keep"), ("client_id", "client-123")]))
			.with_status(200)
			.with_header("content-type", "application/json")
			.with_body(r#"{"access_token":"ya29.new","expires_in":3599,"token_type":"Bearer"}"#)
			.create();
		let c = config(&format!("{}/token", server.url()));
		let old = CachedCredential {
			access_token: "ya29.old".to_string(),
			token_type: "Bearer".to_string(),
			refresh_token: Some("1//keep".to_string()),
			expiry: None,
		};

		let refreshed = oauth().refresh(&c, &old).unwrap();

		assert_eq!(refreshed.access_token, "ya29.new");
		assert_eq!(refreshed.refresh_token.as_deref(), Some("1//keep"));
		mock.assert();
	}

	#[test]
	fn ensure_fresh_leaves_valid_token_alone() {
		let valid = CachedCredential {
			access_token: "ya29.valid".to_string(),
			token_type: "Bearer".to_string(),
			refresh_token: Some("1//r".to_string()),
			expiry: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
		};
		// 到達できないトークンエンドポイントでも、更新が不要なら成功する
		let got = oauth().ensure_fresh(&config("http://127.0.0.1:9/token"), &valid).unwrap();
		assert_eq!(got, valid);
	}

	#[test]
	fn ensure_fresh_skips_go_zero_expiry() {
		let never_expires: CachedCredential =
			serde_json::from_str(r#"{"access_token":"ya29.go","token_type":"Bearer","refresh_token":"1//r","expiry":"0001-01-01T00:00:00Z"}"#).unwrap();
		let got = oauth().ensure_fresh(&config("http://127.0.0.1:9/token"), &never_expires).unwrap();
		assert_eq!(got.access_token, "ya29.go");
	}

	#[test]
	fn ensure_fresh_refreshes_expired_token() {
		let mut server = mockito::Server::new();
		let mock = server
			.mock("POST", "/token")
			.match_body(Matcher::UrlEncoded("grant_type".to_string(), "refresh_token".to_string()))
			.with_status(200)
			.with_header("content-type", "application/json")
			.with_body(r#"{"access_token":"ya29.new","expires_in":3599,"token_type":"Bearer"}"#)
			.create();
		let c = config(&format!("{}/token", server.url()));
		let expired = CachedCredential {
			access_token: "ya29.old".to_string(),
			token_type: "Bearer".to_string(),
			refresh_token: Some("1//r".to_string()),
			expiry: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
		};

		let got = oauth().ensure_fresh(&c, &expired).unwrap();

		assert_eq!(got.access_token, "ya29.new");
		assert!(!got.is_expired(chrono::Utc::now()));
		mock.assert();
	}

	#[test]
	fn refresh_without_refresh_token_fails() {
		let old = CachedCredential {
			access_token: "ya29.old".to_string(),
			token_type: "Bearer".to_string(),
			refresh_token: None,
			expiry: None,
		};
		assert!(oauth().refresh(&config("http://127.0.0.1:9/token"), &old).is_err());
	}
}
