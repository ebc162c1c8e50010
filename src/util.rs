//!
//! 共通のユーティリティ
//!

/// 現在のタイムスタンプを取得します。
pub fn get_current_timestamp() -> String {
	let now = chrono::Local::now();
	let timestamp = now.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
	timestamp
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
		let line = format!($($arg)*);
		let current_timestamp = crate::util::get_current_timestamp();
		let pid = std::process::id();
        println!("{} ({}) [info] {}", current_timestamp, pid, line);
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
		let line = format!($($arg)*);
		let current_timestamp = crate::util::get_current_timestamp();
		let pid = std::process::id();
        println!("{} ({}) [error] {}", current_timestamp, pid, line);
    }};
}

/// "a=1&b=2" 形式の文字列を分解します。
pub fn split_querystring(querystring: &str) -> std::collections::HashMap<String, String> {
	let mut query = std::collections::HashMap::new();
	for pair in querystring.split("&") {
		if pair == "" {
			continue;
		}
		let (key, value) = match pair.split_once("=") {
			Some((key, value)) => (key, value),
			None => (pair, ""),
		};
		query.insert(urldecode(key), urldecode(value));
	}
	return query;
}

/// "GET /?state=... HTTP/1.1" から URL を抽出します。
fn get_request_path(unknown: &str) -> String {
	if !unknown.starts_with("GET /") {
		return String::new();
	}
	let mut items = unknown.split(" ");
	let url = items.nth(1).unwrap_or_default();
	return url.to_string();
}

/// HTTP リクエストを解析し、クエリ文字列を返します。
pub fn diagnose_http_request(http_request: &[String]) -> std::collections::HashMap<String, String> {
	for line in http_request {
		let url = get_request_path(line);
		if url == "" {
			continue;
		}
		return match url.split_once("?") {
			Some((_, querystring)) => split_querystring(querystring),
			None => std::collections::HashMap::new(),
		};
	}
	return std::collections::HashMap::new();
}

/// URL デコーディング
///
/// 不正な % シーケンスはそのまま残します。
pub fn urldecode(s: &str) -> String {
	let bytes = s.as_bytes();
	let mut result: Vec<u8> = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		match bytes[i] {
			b'%' if i + 2 < bytes.len() && bytes[i + 1].is_ascii_hexdigit() && bytes[i + 2].is_ascii_hexdigit() => {
				let hex = String::from_utf8_lossy(&bytes[i + 1..i + 3]);
				result.push(u8::from_str_radix(&hex, 16).unwrap_or(b'?'));
				i += 3;
			}
			b'+' => {
				result.push(b' ');
				i += 1;
			}
			c => {
				result.push(c);
				i += 1;
			}
		}
	}
	return String::from_utf8_lossy(&result).to_string();
}

/// URL エンコーディング
///
/// RFC 3986 の非予約文字 (英数字と `-` `_` `.` `~`) 以外を UTF-8 のバイト単位でエスケープします。
pub fn urlencode(s: &str) -> String {
	let mut result = String::new();
	for b in s.bytes() {
		if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~' {
			result.push(b as char);
		} else {
			result.push_str(&format!("%{:02X}", b));
		}
	}
	return result;
}

/// QueryString を作成します。順序はパラメータの並びのままです。
pub fn build_query_string(params: &[(&str, &str)]) -> String {
	let mut query = String::new();
	for (key, value) in params {
		if query != "" {
			query.push('&');
		}
		query.push_str(&urlencode(key));
		query.push('=');
		query.push_str(&urlencode(value));
	}
	return query;
}

/// 使用可能な TCP ポートを探して待ち受けます。
pub fn bind_available_tcp_port() -> Result<std::net::TcpListener, Box<dyn std::error::Error>> {
	for port in 15000..29000 {
		let address = format!("127.0.0.1:{}", port);
		if let Ok(listener) = std::net::TcpListener::bind(&address) {
			return Ok(listener);
		}
	}

	return Err("No port available".into());
}

/// ブラウザーを開きます。
pub fn open_browser(url: &str) -> Result<(), Box<dyn std::error::Error>> {
	info!("OPEN> {}", url);
	open::that(url)?;
	return Ok(());
}

/// BASE64 (URL セーフ、パディングなし) エンコーディング
pub fn encode_base64url(buffer: &[u8]) -> String {
	use base64::Engine;

	return base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buffer);
}

/// コード検証ツールとしての文字列を生成します。
pub fn generate_random_string(size: usize) -> String {
	let buffer = generate_random_u8_array(size);
	return encode_base64url(&buffer);
}

/// SHA256 ハッシュ
pub fn create_sha256_hash(s: &str) -> Vec<u8> {
	use sha2::Digest;

	let mut hasher = sha2::Sha256::new();
	hasher.update(s.as_bytes());
	return hasher.finalize().to_vec();
}

/// code_verifier >> code_challenge (S256)
pub fn generate_code_challenge(code_verifier: &str) -> String {
	let buffer = create_sha256_hash(code_verifier);
	return encode_base64url(&buffer);
}

/// ランダムな u8 バイト配列を生成します。
pub fn generate_random_u8_array(length: usize) -> Vec<u8> {
	use rand::RngCore;

	let mut result = vec![0u8; length];
	rand::thread_rng().fill_bytes(&mut result);
	return result;
}

pub trait MapHelper {
	fn get_string(&self, key: &str) -> String;
}

impl MapHelper for std::collections::HashMap<String, String> {
	fn get_string(&self, key: &str) -> String {
		return self.get(key).cloned().unwrap_or_default();
	}
}

/// 簡易的なストップウォッチ
pub struct SimpleStopWatch {
	start: std::time::Instant,
}

impl SimpleStopWatch {
	pub fn new() -> Self {
		return Self { start: std::time::Instant::now() };
	}

	pub fn elapsed(&self) -> std::time::Duration {
		return self.start.elapsed();
	}
}

/// フォームを POST し、ステータスコードと本文を返します。
pub fn http_post(client: &reqwest::blocking::Client, url: &str, params: &[(&str, &str)]) -> Result<(u16, String), reqwest::Error> {
	let response = client.post(url).form(params).send()?;
	let status = response.status().as_u16();
	let text = response.text()?;
	return Ok((status, text));
}
