use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ChapterId, ChapterKey, LessonId};
use crate::model::progress::completion_rate;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CurriculumError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("duplicate lesson id {0}")]
    DuplicateLesson(LessonId),

    #[error("duplicate chapter id {chapter} in lesson {lesson}")]
    DuplicateChapter { lesson: LessonId, chapter: ChapterId },

    #[error("lesson {0} has no chapters")]
    EmptyLesson(LessonId),
}

//
// ─── ENTITIES ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: String,
    #[serde(default)]
    pub estimated_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub title: String,
    pub chapters: Vec<Chapter>,
}

impl Lesson {
    #[must_use]
    pub fn chapter(&self, id: &ChapterId) -> Option<&Chapter> {
        self.chapters.iter().find(|c| &c.id == id)
    }

    #[must_use]
    pub fn estimated_minutes(&self) -> u32 {
        self.chapters.iter().map(|c| c.estimated_minutes).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub lessons: Vec<Lesson>,
}

//
// ─── CATALOG ───────────────────────────────────────────────────────────────────
//

/// Immutable, validated view over a course used to compute totals and rates.
#[derive(Debug, Clone, PartialEq)]
pub struct Curriculum {
    course: Course,
    total_chapters: u32,
}

impl Curriculum {
    /// Validate a course and build the catalog.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumError` on an empty title, a lesson without chapters,
    /// or duplicate lesson/chapter ids.
    pub fn new(course: Course) -> Result<Self, CurriculumError> {
        if course.title.trim().is_empty() {
            return Err(CurriculumError::EmptyTitle);
        }

        let mut lessons = HashSet::new();
        let mut total = 0_u32;
        for lesson in &course.lessons {
            if !lessons.insert(&lesson.id) {
                return Err(CurriculumError::DuplicateLesson(lesson.id.clone()));
            }
            if lesson.chapters.is_empty() {
                return Err(CurriculumError::EmptyLesson(lesson.id.clone()));
            }
            let mut chapters = HashSet::new();
            for chapter in &lesson.chapters {
                if !chapters.insert(&chapter.id) {
                    return Err(CurriculumError::DuplicateChapter {
                        lesson: lesson.id.clone(),
                        chapter: chapter.id.clone(),
                    });
                }
                total = total.saturating_add(1);
            }
        }

        Ok(Self {
            course,
            total_chapters: total,
        })
    }

    #[must_use]
    pub fn course(&self) -> &Course {
        &self.course
    }

    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.course.lessons
    }

    /// Sum of chapter counts across every lesson.
    #[must_use]
    pub fn total_chapters(&self) -> u32 {
        self.total_chapters
    }

    #[must_use]
    pub fn lesson(&self, id: &LessonId) -> Option<&Lesson> {
        self.course.lessons.iter().find(|l| &l.id == id)
    }

    #[must_use]
    pub fn chapter(&self, key: &ChapterKey) -> Option<&Chapter> {
        self.lesson(&key.lesson_id)
            .and_then(|lesson| lesson.chapter(&key.chapter_id))
    }

    /// Title of a chapter, or an empty string for keys outside the catalog.
    #[must_use]
    pub fn chapter_title(&self, key: &ChapterKey) -> String {
        self.chapter(key)
            .map(|c| c.title.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, key: &ChapterKey) -> bool {
        self.chapter(key).is_some()
    }

    /// Percentage of a lesson's chapters accepted by `is_completed`.
    ///
    /// Unknown lessons report 0.
    pub fn lesson_completion_rate(
        &self,
        lesson_id: &LessonId,
        mut is_completed: impl FnMut(&ChapterKey) -> bool,
    ) -> u32 {
        let Some(lesson) = self.lesson(lesson_id) else {
            return 0;
        };
        let total = u32::try_from(lesson.chapters.len()).unwrap_or(u32::MAX);
        let completed = lesson
            .chapters
            .iter()
            .filter(|c| is_completed(&ChapterKey::new(lesson.id.clone(), c.id.clone())))
            .count();
        completion_rate(u32::try_from(completed).unwrap_or(u32::MAX), total)
    }

    /// The built-in six-lesson generative AI course.
    ///
    /// # Panics
    ///
    /// Never in practice: the built-in table uses valid, unique ids.
    #[must_use]
    pub fn basic_course() -> Self {
        let lessons = BASIC_COURSE
            .iter()
            .map(|(lesson_id, title, chapters)| Lesson {
                id: LessonId::new(*lesson_id).expect("built-in lesson id is valid"),
                title: (*title).to_string(),
                chapters: chapters
                    .iter()
                    .enumerate()
                    .map(|(idx, (chapter_title, minutes))| Chapter {
                        id: ChapterId::new(format!("chapter{}", idx + 1))
                            .expect("built-in chapter id is valid"),
                        title: (*chapter_title).to_string(),
                        estimated_minutes: *minutes,
                    })
                    .collect(),
            })
            .collect();

        Self::new(Course {
            id: "basic_course".to_string(),
            title: "Generative AI Fundamentals".to_string(),
            lessons,
        })
        .expect("built-in course is valid")
    }
}

type ChapterRow = (&'static str, u32);

const BASIC_COURSE: &[(&str, &str, &[ChapterRow])] = &[
    (
        "lesson1",
        "Lesson 1 Generative AI basics",
        &[
            ("What generative AI is", 15),
            ("How generative AI changed things", 15),
            ("Tasks ChatGPT is good and bad at", 15),
            ("Caveats when using generative AI", 15),
            ("[Quiz 1] Try text generation", 30),
            ("[Quiz 2] Pick a problem for ChatGPT", 30),
        ],
    ),
    (
        "lesson2",
        "Lesson 2 Introduction to prompt engineering",
        &[
            ("Why prompt engineering matters", 15),
            ("Prompt engineering techniques", 15),
            ("Pitfalls when writing prompts", 60),
            ("[Quiz] Fix a prompt using the pitfalls", 60),
        ],
    ),
    (
        "lesson3",
        "Lesson 3 Prompt techniques: basics",
        &[
            ("Structure is the key", 60),
            ("[Quiz 1] Write a structured prompt", 60),
            ("Asking for a fixed output format", 30),
            ("[Quiz 2] Get answers in a given format", 60),
        ],
    ),
    (
        "lesson4",
        "Lesson 4 Prompt techniques: advanced",
        &[
            ("Improving results", 60),
            ("[Quiz 1] Improve a prompt", 60),
            ("Prompt techniques", 72),
            ("[Quiz 2] Write prompts with techniques", 60),
            ("Output formats", 60),
            ("Useful extensions", 60),
            ("[Quiz 3] Try GPTs", 60),
        ],
    ),
    (
        "lesson5",
        "Lesson 5 Monetizing prompts",
        &[
            ("Selling prompts", 11),
            ("The GPT Store as a revenue source", 11),
            ("Building prompts and GPTs that sell", 15),
            ("[Quiz] Write a prompt that sells", 30),
        ],
    ),
    (
        "lesson6",
        "Lesson 6 Applied exercises",
        &[
            ("[Exercise 1] Edit prose", 60),
            ("[Exercise 2] Write meeting minutes", 60),
            ("[Exercise 3] Exchange English emails", 60),
            ("[Exercise 4] Draft a contract", 60),
            ("[Exercise 5] Prepare a call center", 60),
            ("[Exercise 6] Program with AI", 60),
            ("[Exercise 7] Build an app", 60),
            ("[Exercise 8] Build a chatbot", 60),
            ("[Exercise 9] Generate ideas", 60),
        ],
    ),
];
