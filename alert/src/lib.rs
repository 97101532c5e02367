pub mod condition;
pub mod engine;
pub mod error;
pub mod history;
pub mod notification;
pub mod rolling_window;
pub mod sink;
pub mod state;

pub use condition::{AlertCondition, AlertKey, AlertKind, Comparison, VolumeBaseline};
pub use engine::{AlertEngine, ReferencePolicy};
pub use error::{AlertError, DeliveryError};
pub use history::{AlertHistory, EvaluationRecord, StoreAlertHistory};
pub use notification::NotificationEvent;
pub use sink::{ChannelSink, LogSink, MultiSink, NotificationSink};
pub use state::{AlertState, TriggerState};
