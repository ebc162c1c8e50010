//!
//! 認可手続きのエラー
//!

/// 資格情報の取得中に発生するエラー
///
/// いずれも致命的なエラーです。呼び出し側がプロセスを終了するかどうかを決めます。
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
	/// 認可コードを読み取れなかった
	#[error("Unable to read authorization code: {0}")]
	Input(String),

	/// 認可サーバーがトークンの発行を拒否した
	#[error("Unable to retrieve token from web: {0}")]
	Exchange(String),

	/// 認可サーバーに到達できなかった
	#[error("Unable to reach authorization server: {0}")]
	Transport(#[from] reqwest::Error),

	/// キャッシュファイルへの書き込みに失敗した
	#[error("Unable to cache oauth token: {0}")]
	Cache(#[from] std::io::Error),

	/// トークンのシリアライズに失敗した
	#[error("Unable to encode oauth token: {0}")]
	Encode(#[from] serde_json::Error),
}
