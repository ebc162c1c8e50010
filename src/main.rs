//!
//! Rust + Google Apps Script API のサンプル
//!
//! 資格情報を ~/.credentials にキャッシュし、スクリプトの関数を一度だけ実行して結果を表示します。
//!
//! # References
//! - [モバイル &デスクトップ アプリ向け OAuth 2.0](https://developers.google.com/identity/protocols/oauth2/native-app?hl=ja)
//! - [Apps Script API](https://developers.google.com/apps-script/api/how-tos/execute?hl=ja)

mod configuration;
mod credential;
mod errors;
mod gauth2;
mod receiver;
mod script;
mod util;

use credential::{CredentialCache, CredentialProvider};
use gauth2::GoogleOAuth2;
use receiver::{ConsoleCodeReceiver, LoopbackCodeReceiver};

/// 要求するスコープ
///
/// 変更した場合は ~/.credentials/script-rust-quickstart.json を削除してください。
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// 既定のスクリプト ID
const DEFAULT_SCRIPT_ID: &str = "Mn_YoQoNj_iufS59FmWsY-JgYYRqhh78z";

/// 既定の関数名
const DEFAULT_FUNCTION: &str = "getFoldersUnderRoot";

/// コマンドラインで指定された設定
struct Settings {
	client_secret: Option<String>,
	loopback: bool,
	launch_browser: bool,
	timeout: std::time::Duration,
	script_id: String,
	function: String,
}

/// Rust アプリケーションのエントリーポイント
fn main() {
	// コマンドラインオプションを解析する
	let args: Vec<String> = std::env::args().skip(1).collect();
	let mut options = getopts::Options::new();
	options.optflag("h", "help", "Usage");
	options.optopt("c", "client-secret", "client_secret.json のパス", "PATH");
	options.optflag("l", "loopback", "ローカルサーバーでリダイレクトを受け取る (ブラウザーを開きます)");
	options.optflag("n", "no-browser", "--loopback でブラウザーを自動で開かない");
	options.optopt("t", "timeout", "--loopback で待機する秒数 (既定 120)", "SECONDS");
	options.optopt("s", "script-id", "実行するスクリプトの ID", "ID");
	options.optopt("f", "function", "実行する関数名", "NAME");
	let matches = match options.parse(args) {
		Ok(matches) => matches,
		Err(err) => {
			println!("{}", err);
			println!("{}", options.usage(""));
			std::process::exit(1);
		}
	};

	if matches.opt_present("h") {
		println!("{}", options.usage(""));
		std::process::exit(0);
	}

	let timeout = match matches.opt_get_default("t", 120u64) {
		Ok(seconds) => std::time::Duration::from_secs(seconds),
		Err(err) => {
			println!("--timeout: {}", err);
			println!("{}", options.usage(""));
			std::process::exit(1);
		}
	};

	let settings = Settings {
		client_secret: matches.opt_str("c"),
		loopback: matches.opt_present("l"),
		launch_browser: !matches.opt_present("n"),
		timeout: timeout,
		script_id: matches.opt_str("s").unwrap_or_else(|| DEFAULT_SCRIPT_ID.to_string()),
		function: matches.opt_str("f").unwrap_or_else(|| DEFAULT_FUNCTION.to_string()),
	};

	let result = execute(&settings);
	if let Err(err) = result {
		error!("{}", err);
		std::process::exit(1);
	}
}

/// 資格情報を取得し、スクリプトの関数を実行します。
fn execute(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
	let config = configuration::configure(settings.client_secret.as_deref(), &[DRIVE_SCOPE])?;

	let cache = CredentialCache::default_location()?;
	let oauth = GoogleOAuth2::new();
	let credential = if settings.loopback {
		let receiver = LoopbackCodeReceiver::new()?.with_browser(settings.launch_browser).with_timeout(settings.timeout);
		CredentialProvider::new(cache, &oauth, receiver).acquire(&config)?
	} else {
		let receiver = ConsoleCodeReceiver::stdio();
		CredentialProvider::new(cache, &oauth, receiver).acquire(&config)?
	};

	// 期限切れなら更新トークンで更新してから呼び出す
	let credential = oauth.ensure_fresh(&config, &credential)?;

	let service = script::ScriptService::new(&credential.access_token);
	let text = script::execute(&service, &settings.script_id, &settings.function)?;
	println!("{}", text);

	return Ok(());
}
