//!
//! 認可コードの受け取り
//!

use std::io::{BufRead, Write};

use crate::configuration::AuthorizationConfig;
use crate::errors::CredentialError;
use crate::{error, info, util};

/// ユーザーから認可コードを受け取るもの
pub trait CodeReceiver {
	/// 認可 URL と交換時に使うリダイレクト URI
	fn redirect_uri(&self, config: &AuthorizationConfig) -> String;

	/// 認可 URL をユーザーに示し、認可コードが届くまで待機します。
	///
	/// # Arguments
	/// * `auth_url` - 認可画面の URL
	/// * `state` - 認可 URL に埋め込んだ state
	fn receive_code(&mut self, auth_url: &str, state: &str) -> Result<String, CredentialError>;
}

impl<T: CodeReceiver + ?Sized> CodeReceiver for &mut T {
	fn redirect_uri(&self, config: &AuthorizationConfig) -> String {
		return (**self).redirect_uri(config);
	}

	fn receive_code(&mut self, auth_url: &str, state: &str) -> Result<String, CredentialError> {
		return (**self).receive_code(auth_url, state);
	}
}

/// URL を表示し、貼り付けられた認可コードをコンソールから読み取ります。
///
/// タイムアウトはありません。
pub struct ConsoleCodeReceiver<I: BufRead, O: Write> {
	input: I,
	output: O,
}

impl ConsoleCodeReceiver<std::io::StdinLock<'static>, std::io::Stdout> {
	/// 標準入出力を使います。
	pub fn stdio() -> Self {
		return Self::new(std::io::stdin().lock(), std::io::stdout());
	}
}

impl<I: BufRead, O: Write> ConsoleCodeReceiver<I, O> {
	pub fn new(input: I, output: O) -> Self {
		return Self { input, output };
	}

	/// 空白で区切られた最初の語を読み取ります。空行は読み飛ばします。
	fn read_token(&mut self) -> Result<String, CredentialError> {
		loop {
			let mut line = String::new();
			let size = self.input.read_line(&mut line).map_err(|e| CredentialError::Input(e.to_string()))?;
			if size == 0 {
				return Err(CredentialError::Input("unexpected end of input".to_string()));
			}
			if let Some(token) = line.split_whitespace().next() {
				return Ok(token.to_string());
			}
		}
	}
}

impl<I: BufRead, O: Write> CodeReceiver for ConsoleCodeReceiver<I, O> {
	fn redirect_uri(&self, config: &AuthorizationConfig) -> String {
		return config.redirect_uri.clone();
	}

	fn receive_code(&mut self, auth_url: &str, _state: &str) -> Result<String, CredentialError> {
		let result = writeln!(
			self.output,
			"Go to the following link in your browser then type the authorization code: \n{}",
			auth_url
		)
		.and_then(|_| self.output.flush());
		result.map_err(|e| CredentialError::Input(e.to_string()))?;

		return self.read_token();
	}
}

/// ローカルに HTTP サーバーを立ち上げ、Google からのリダイレクトで認可コードを受け取ります。
pub struct LoopbackCodeReceiver {
	listener: std::net::TcpListener,
	timeout: std::time::Duration,
	launch_browser: bool,
}

impl LoopbackCodeReceiver {
	/// 空いているポートで待ち受けを開始します。
	pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
		info!("ローカルサーバーを起動しています...");
		let listener = util::bind_available_tcp_port()?;
		// 適当にキャンセルできるためには、accept が non-blocking である必要があります。
		listener.set_nonblocking(true)?;

		let instance = Self {
			listener: listener,
			timeout: std::time::Duration::from_secs(120),
			launch_browser: true,
		};
		return Ok(instance);
	}

	/// 待機時間を変更します。
	pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
		self.timeout = timeout;
		return self;
	}

	/// ブラウザーを自動で開くかどうか
	pub fn with_browser(mut self, launch_browser: bool) -> Self {
		self.launch_browser = launch_browser;
		return self;
	}

	fn port(&self) -> u16 {
		return self.listener.local_addr().map(|address| address.port()).unwrap_or_default();
	}

	/// リダイレクトを待ち、クエリ文字列を返します。
	///
	/// code も error も含まないリクエスト (favicon など) は読み捨てて待ち続けます。
	fn recv_response(&self) -> Result<std::collections::HashMap<String, String>, CredentialError> {
		let stop_watch = util::SimpleStopWatch::new();

		info!("リクエストを待機しています...");
		loop {
			if self.timeout <= stop_watch.elapsed() {
				return Err(CredentialError::Input(format!(
					"認可手続きの待機時間が{}秒を超えたため、手続きはタイムアウトしました。",
					self.timeout.as_secs()
				)));
			}

			let stream = match self.listener.accept() {
				Ok((stream, _)) => stream,
				Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					std::thread::sleep(std::time::Duration::from_millis(100));
					continue;
				}
				Err(e) => {
					error!("復旧不能なエラーです。理由: {:?}", e);
					return Err(CredentialError::Input(e.to_string()));
				}
			};

			let query = match accept_peer(stream) {
				Ok(query) => query,
				Err(e) => {
					info!("リクエストを読み取れません。理由: {}", e);
					continue;
				}
			};
			if query.contains_key("code") || query.contains_key("error") {
				return Ok(query);
			}
		}
	}
}

/// 接続を受け付け、リクエストのクエリ文字列を返します。
fn accept_peer(mut stream: std::net::TcpStream) -> std::io::Result<std::collections::HashMap<String, String>> {
	info!("着信あり");
	stream.set_nonblocking(false)?;
	stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;

	let buf_reader = std::io::BufReader::new(&mut stream);
	let http_request: Vec<String> = buf_reader.lines().map_while(Result::ok).take_while(|line| !line.is_empty()).collect();

	let query = util::diagnose_http_request(&http_request);

	let response = if query.contains_key("code") {
		"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nOk. You may close this window."
	} else {
		"HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n"
	};
	stream.write_all(response.as_bytes())?;
	stream.flush()?;

	return Ok(query);
}

impl CodeReceiver for LoopbackCodeReceiver {
	fn redirect_uri(&self, _config: &AuthorizationConfig) -> String {
		return format!("http://localhost:{}", self.port());
	}

	fn receive_code(&mut self, auth_url: &str, state: &str) -> Result<String, CredentialError> {
		use util::MapHelper;

		println!("Authorize this application in your browser: \n{}", auth_url);
		if self.launch_browser {
			if let Err(e) = util::open_browser(auth_url) {
				error!("ブラウザーを開けません。上記の URL を手動で開いてください。理由: {}", e);
			}
		}

		let query = self.recv_response()?;

		// 初めに error を取得する
		let error = query.get_string("error");
		if error != "" {
			return Err(CredentialError::Input(error));
		}

		if query.get_string("state") != state {
			return Err(CredentialError::Input("state mismatch".to_string()));
		}

		let code = query.get_string("code");
		if code == "" {
			return Err(CredentialError::Input("empty authorization code".to_string()));
		}
		return Ok(code);
	}
}
