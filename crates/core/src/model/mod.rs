mod activity;
mod curriculum;
mod ids;
mod progress;
pub mod remote_row;
mod session;

pub use ids::{ChapterId, ChapterKey, IdError, LessonId, UserId};

pub use activity::{append_bounded, ActivityEntry, ActivityKind, ACTIVITY_LOG_CAPACITY};
pub use curriculum::{Chapter, Course, Curriculum, CurriculumError, Lesson};
pub use progress::{completion_rate, ChapterCompletion, UserProgress};
pub use remote_row::{RemoteProgressRow, RowError, SheetSnapshot};
pub use session::{
    LoginRecord, Role, Roster, RosterEntry, RosterError, UserSession, LOGIN_HISTORY_CAPACITY,
    SESSION_TTL_HOURS,
};
