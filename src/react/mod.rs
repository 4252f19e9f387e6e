//! 认知层：上下文压缩、工具调用解析、Planner、回复合成与编排主循环

pub mod compress;
pub mod extractor;
pub mod loop_;
pub mod planner;
pub mod synthesizer;

pub use compress::{compress, MAX_CONTEXT_MESSAGES};
pub use extractor::{Extraction, IntentExtractor, SentinelExtractor, REASONING_MARKER};
pub use loop_::{run_turns, TurnSession};
pub use planner::Planner;
pub use synthesizer::{Synthesizer, COMPLETENESS_PHRASE, DIVIDER};
