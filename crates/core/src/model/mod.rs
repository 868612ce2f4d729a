mod ids;
mod progress;
mod quiz;
mod settings;

pub use ids::{AnswerId, ParseIdError, QuestionId, QuizId, UserId};
pub use progress::{Progress, ReoccurrenceCounter};
pub use quiz::{Answer, Question, Quiz};
pub use settings::{SessionSettings, SettingsPatch};
