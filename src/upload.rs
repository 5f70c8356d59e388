//! チャンク分割アップロードの組み立て。
//!
//! `/ws/upload` の双方向セッションでアーカイブを受信し、スクラッチファイルに
//! 書き出してパイプラインへ引き渡す。

pub(crate) mod protocol;
pub(crate) mod session;
