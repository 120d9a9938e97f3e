use std::sync::Arc;

use crate::ml::ImageClassifier;

/// HTTPハンドラの共有状態
///
/// 分類器は起動時に一度だけ構築され、呼び出し側から注入されます。
#[derive(Clone)]
pub struct AppState {
    /// `None` の場合 `/predict` は 500 を返す
    pub classifier: Option<Arc<dyn ImageClassifier>>,
    /// アップロードサイズ上限（バイト）
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(classifier: Option<Arc<dyn ImageClassifier>>, max_upload_bytes: usize) -> Self {
        Self {
            classifier,
            max_upload_bytes,
        }
    }
}
