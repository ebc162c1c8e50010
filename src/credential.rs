//!
//! 資格情報のローカルキャッシュと取得手続き
//!
//! キャッシュファイルがあればそれを信頼して返します。無ければ対話的に認可手続きを行い、結果を保存します。
//! 複数のプロセスが同時に書き込んだ場合は最後に書いたものが残ります (ロックはしません)。
//!

use crate::configuration::AuthorizationConfig;
use crate::errors::CredentialError;
use crate::gauth2::{self, TokenExchanger};
use crate::receiver::CodeReceiver;
use crate::{error, info, util};

/// キャッシュの既定のディレクトリ名 (ホームディレクトリ直下)
const CREDENTIALS_DIR: &str = ".credentials";

/// キャッシュの既定のファイル名
const CREDENTIALS_FILE: &str = "script-rust-quickstart.json";

/// 有効期限の何秒前から期限切れとみなすか
const EXPIRY_DELTA_SECONDS: i64 = 10;

/// Go のゼロ値 (0001-01-01T00:00:00Z) の UNIX 時刻。他のツールはこれを「有効期限なし」として書きます。
const ZERO_TIME_UNIX_SECONDS: i64 = -62135596800;

/// キャッシュされる資格情報
#[derive(serde_derive::Serialize, serde_derive::Deserialize, Debug, Clone, PartialEq)]
pub struct CachedCredential {
	/// アクセストークン
	pub access_token: String,
	/// 通常は Bearer
	#[serde(default)]
	pub token_type: String,
	/// 更新トークン
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<String>,
	/// アクセストークンの有効期限
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expiry: Option<chrono::DateTime<chrono::Utc>>,
}

impl CachedCredential {
	/// 有効期限が切れているかどうかを返します。有効期限が無いもの (ゼロ時刻を含む) は期限切れになりません。
	pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
		let expiry = match self.expiry {
			Some(expiry) if !is_zero_time(&expiry) => expiry,
			_ => return false,
		};
		// 猶予を引けないほど古い時刻は期限切れ
		return match expiry.checked_sub_signed(chrono::Duration::seconds(EXPIRY_DELTA_SECONDS)) {
			Some(deadline) => deadline <= now,
			None => true,
		};
	}
}

fn is_zero_time(time: &chrono::DateTime<chrono::Utc>) -> bool {
	return time.timestamp() == ZERO_TIME_UNIX_SECONDS && time.timestamp_subsec_nanos() == 0;
}

/// 資格情報のキャッシュファイル
#[derive(Debug, Clone)]
pub struct CredentialCache {
	dir: std::path::PathBuf,
	file_name: String,
}

impl CredentialCache {
	/// # Arguments
	/// * `dir` - キャッシュを置くディレクトリ
	/// * `file_name` - ファイル名 (エスケープされます)
	pub fn new(dir: impl Into<std::path::PathBuf>, file_name: &str) -> Self {
		return Self {
			dir: dir.into(),
			file_name: util::urlencode(file_name),
		};
	}

	/// `~/.credentials/script-rust-quickstart.json`
	pub fn default_location() -> Result<Self, Box<dyn std::error::Error>> {
		let dirs = directories::UserDirs::new().ok_or("Unable to get path to cached credential file: no home directory")?;
		let dir = dirs.home_dir().join(CREDENTIALS_DIR);
		return Ok(Self::new(dir, CREDENTIALS_FILE));
	}

	pub fn path(&self) -> std::path::PathBuf {
		return self.dir.join(&self.file_name);
	}

	/// キャッシュディレクトリを作成します。既にあれば何もしません。
	pub fn ensure_dir(&self) -> std::io::Result<()> {
		let mut builder = std::fs::DirBuilder::new();
		builder.recursive(true);
		#[cfg(unix)]
		{
			use std::os::unix::fs::DirBuilderExt;
			builder.mode(0o700);
		}
		return builder.create(&self.dir);
	}

	/// キャッシュを読み込みます。
	///
	/// 読めない、またはパースできない場合は `None` を返します。
	pub fn load(&self) -> Option<CachedCredential> {
		let path = self.path();
		let text = match std::fs::read_to_string(&path) {
			Ok(text) => text,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
			Err(e) => {
				info!("キャッシュを読み込めません。{} ({})", path.display(), e);
				return None;
			}
		};
		return match serde_json::from_str::<CachedCredential>(&text) {
			Ok(credential) => Some(credential),
			Err(e) => {
				info!("キャッシュを解析できません。{} ({})", path.display(), e);
				None
			}
		};
	}

	/// キャッシュを保存します。既存の内容は丸ごと置き換えられます。
	///
	/// 同じディレクトリの一時ファイルに書き出してから rename するので、途中まで書かれたファイルが読まれることはありません。
	pub fn save(&self, credential: &CachedCredential) -> Result<(), CredentialError> {
		use std::io::Write;

		self.ensure_dir()?;

		let mut json = serde_json::to_vec(credential)?;
		json.push(b'\n');

		let path = self.path();
		let temporary = self.dir.join(format!(".{}.{}.tmp", self.file_name, std::process::id()));

		let mut options = std::fs::OpenOptions::new();
		options.write(true).create(true).truncate(true);
		#[cfg(unix)]
		{
			use std::os::unix::fs::OpenOptionsExt;
			options.mode(0o600);
		}

		let result = options.open(&temporary).and_then(|mut file| {
			file.write_all(&json)?;
			file.sync_all()?;
			return Ok(());
		});
		let result = result.and_then(|_| std::fs::rename(&temporary, &path));
		if let Err(e) = result {
			let _ = std::fs::remove_file(&temporary);
			return Err(e.into());
		}

		return Ok(());
	}
}

/// 認可手続きで使う固定の state
pub const STATE_TOKEN: &str = "state-token";

/// 資格情報を提供します。
pub struct CredentialProvider<X: TokenExchanger, R: CodeReceiver> {
	cache: CredentialCache,
	exchanger: X,
	receiver: R,
}

impl<X: TokenExchanger, R: CodeReceiver> CredentialProvider<X, R> {
	pub fn new(cache: CredentialCache, exchanger: X, receiver: R) -> Self {
		return Self { cache, exchanger, receiver };
	}

	/// 資格情報を取得します。
	///
	/// キャッシュがあれば有効期限を確認せずにそのまま返します。
	/// 無ければ認可コードを入力してもらい、トークンに変換して保存します。
	pub fn acquire(&mut self, config: &AuthorizationConfig) -> Result<CachedCredential, CredentialError> {
		// ディレクトリ作成の失敗は、保存時のエラーとして表面化します。
		if let Err(e) = self.cache.ensure_dir() {
			error!("キャッシュディレクトリを作成できません。理由: {}", e);
		}

		if let Some(credential) = self.cache.load() {
			info!("キャッシュされた資格情報を使用します。{}", self.cache.path().display());
			return Ok(credential);
		}

		let credential = self.acquire_from_web(config)?;

		let path = self.cache.path();
		println!("Saving credential file to: {}", path.display());
		self.cache.save(&credential)?;

		return Ok(credential);
	}

	/// 認可手続きを行い、新しい資格情報を取得します。
	fn acquire_from_web(&mut self, config: &AuthorizationConfig) -> Result<CachedCredential, CredentialError> {
		info!("認可手続きを開始しています...");

		let code_verifier = util::generate_random_string(32);
		let code_challenge = util::generate_code_challenge(&code_verifier);
		let redirect_uri = self.receiver.redirect_uri(config);

		let auth_url = gauth2::authorization_url(config, STATE_TOKEN, &redirect_uri, &code_challenge);
		let code = self.receiver.receive_code(&auth_url, STATE_TOKEN)?;

		return self.exchanger.exchange(config, &code, &code_verifier, &redirect_uri);
	}
}
