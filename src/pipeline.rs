//! 処理パイプライン。
//!
//! 展開 → ラベリング → クラスタリング → マージ → ランキング → 補正の
//! 各ステージと、ジョブ状態機械を運転するオーケストレータ。

pub(crate) mod cluster;
pub(crate) mod context;
pub(crate) mod enhance;
pub(crate) mod label;
mod orchestrator;
pub mod progress;
pub(crate) mod rank;
pub mod recovery;

pub use orchestrator::PipelineOrchestrator;
pub(crate) use context::{StageContext, StageOutcome};
