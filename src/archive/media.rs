//! アーカイブエントリの採否判定と MIME 解決。

use crate::store::models::MediaType;

/// 受理された1エントリの分類結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MediaKind {
    pub(crate) media_type: MediaType,
    pub(crate) mime_type: &'static str,
}

/// エントリのパスから採否と種別を判定する。
///
/// 隠しファイル、リソースフォーク（`._*`）、`__MACOSX` 配下、`Thumbs.db`、
/// 未対応拡張子は None を返す。
pub(crate) fn classify_entry(entry_path: &str) -> Option<MediaKind> {
    let normalized = entry_path.replace('\\', "/");

    if normalized
        .split('/')
        .any(|component| component == "__MACOSX")
    {
        return None;
    }

    let basename = normalized.rsplit('/').next().unwrap_or(&normalized);
    if basename.is_empty() || basename.starts_with('.') {
        return None;
    }
    if basename.eq_ignore_ascii_case("Thumbs.db") {
        return None;
    }

    let extension = basename.rsplit('.').next()?;
    if extension == basename {
        // 拡張子なし
        return None;
    }

    classify_extension(&extension.to_ascii_lowercase())
}

fn classify_extension(extension: &str) -> Option<MediaKind> {
    let (media_type, mime_type) = match extension {
        "jpg" | "jpeg" => (MediaType::Image, "image/jpeg"),
        "png" => (MediaType::Image, "image/png"),
        "gif" => (MediaType::Image, "image/gif"),
        "webp" => (MediaType::Image, "image/webp"),
        "heic" => (MediaType::Image, "image/heic"),
        "heif" => (MediaType::Image, "image/heif"),
        "bmp" => (MediaType::Image, "image/bmp"),
        "tiff" => (MediaType::Image, "image/tiff"),
        "mp4" => (MediaType::Video, "video/mp4"),
        "mov" => (MediaType::Video, "video/quicktime"),
        "avi" => (MediaType::Video, "video/x-msvideo"),
        "mkv" => (MediaType::Video, "video/x-matroska"),
        "webm" => (MediaType::Video, "video/webm"),
        "m4v" => (MediaType::Video, "video/x-m4v"),
        _ => return None,
    };

    Some(MediaKind {
        media_type,
        mime_type,
    })
}
