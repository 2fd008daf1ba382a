//! Task trait - 型付き Task の定義
//!
//! task_type 文字列と payload 型を対応付ける。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::TaskType;

/// Task は task_type と型を対応付ける
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct DeliverEmail {
///     user_id: u64,
///     template_id: String,
/// }
///
/// impl Task for DeliverEmail {
///     const TYPE: &'static str = "email:deliver";
/// }
/// ```
///
/// - `Serialize`: enqueue 時に JSON payload へ
/// - `DeserializeOwned`: worker 側で payload から復元
/// - `Send + Sync + 'static`: spawn された handler に渡すため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    fn task_type() -> TaskType {
        TaskType::new(Self::TYPE)
    }
}
