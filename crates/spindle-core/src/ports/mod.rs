//! Ports - 抽象化レイヤー
//!
//! 時刻と ID 生成を trait にして、エンジンのコンテキストから差し替え可能にする。
//! ストアの port は `queue::QueueStore`。

pub mod clock;
pub mod id_generator;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
