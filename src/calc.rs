use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::GradingError;

/// Tolerance for treating a float as zero, or two grades as equal.
pub const ALMOST_ZERO: f64 = 5e-6;

/// Rule for reducing several finished attempts to one grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeMethod {
    Highest,
    Average,
    First,
    Last,
}

impl GradeMethod {
    /// Integer code persisted in `quizzes.grade_method`.
    pub fn code(self) -> i64 {
        match self {
            Self::Highest => 1,
            Self::Average => 2,
            Self::First => 3,
            Self::Last => 4,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, GradingError> {
        match code {
            1 => Ok(Self::Highest),
            2 => Ok(Self::Average),
            3 => Ok(Self::First),
            4 => Ok(Self::Last),
            other => Err(GradingError::UnknownGradeMethod(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Highest => "highest",
            Self::Average => "average",
            Self::First => "first",
            Self::Last => "last",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    InProgress,
    Overdue,
    Finished,
    Abandoned,
}

impl AttemptState {
    pub fn parse(s: &str) -> Result<Self, GradingError> {
        match s {
            "inprogress" => Ok(Self::InProgress),
            "overdue" => Ok(Self::Overdue),
            "finished" => Ok(Self::Finished),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(GradingError::UnknownAttemptState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub attempt_number: i64,
    pub state: AttemptState,
    pub raw_score: Option<f64>,
    #[serde(default)]
    pub preview: bool,
}

impl AttemptSummary {
    pub fn finished(attempt_number: i64, raw_score: f64) -> Self {
        Self {
            attempt_number,
            state: AttemptState::Finished,
            raw_score: Some(raw_score),
            preview: false,
        }
    }

    fn eligible_score(&self) -> Option<f64> {
        if self.preview || self.state != AttemptState::Finished {
            return None;
        }
        self.raw_score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBand {
    pub id: String,
    pub feedback_text: String,
    pub min_grade: f64,
    pub max_grade: f64,
}

fn eligible(attempts: &[AttemptSummary]) -> impl Iterator<Item = (&AttemptSummary, f64)> {
    attempts
        .iter()
        .filter_map(|a| a.eligible_score().map(|score| (a, score)))
}

/// Reduce a learner's attempts to one raw grade. Only finished, non-preview
/// attempts with a raw score count; `None` means there is nothing to grade.
pub fn aggregate_attempts(method: GradeMethod, attempts: &[AttemptSummary]) -> Option<f64> {
    match method {
        GradeMethod::Average => {
            let mut sum = 0.0_f64;
            let mut count = 0_usize;
            for (_, score) in eligible(attempts) {
                sum += score;
                count += 1;
            }
            if count == 0 {
                None
            } else {
                Some(sum / count as f64)
            }
        }
        GradeMethod::Highest | GradeMethod::First | GradeMethod::Last => {
            best_attempt(method, attempts).and_then(|a| a.raw_score)
        }
    }
}

/// The attempt whose score becomes the grade. AVERAGE has no single such
/// attempt. HIGHEST ties go to the earliest attempt.
pub fn best_attempt(method: GradeMethod, attempts: &[AttemptSummary]) -> Option<&AttemptSummary> {
    match method {
        GradeMethod::Average => None,
        GradeMethod::First => eligible(attempts)
            .min_by_key(|(a, _)| a.attempt_number)
            .map(|(a, _)| a),
        GradeMethod::Last => eligible(attempts)
            .max_by_key(|(a, _)| a.attempt_number)
            .map(|(a, _)| a),
        GradeMethod::Highest => {
            let mut best: Option<(&AttemptSummary, f64)> = None;
            for (a, score) in eligible(attempts) {
                let replace = match best {
                    None => true,
                    Some((_, top)) => score.partial_cmp(&top) == Some(Ordering::Greater),
                };
                if replace {
                    best = Some((a, score));
                }
            }
            best.map(|(a, _)| a)
        }
    }
}

/// Map a raw grade onto the quiz's grade scale. A degenerate `sum_grades`
/// yields 0 instead of dividing.
pub fn rescale_grade(raw_grade: f64, max_grade: f64, sum_grades: f64) -> f64 {
    if sum_grades >= ALMOST_ZERO {
        raw_grade * max_grade / sum_grades
    } else {
        0.0
    }
}

/// Change detection for stored grades. A missing grade and a grade of 0 are
/// different values.
pub fn grades_differ(old: Option<f64>, new: Option<f64>) -> bool {
    match (old, new) {
        (None, None) => false,
        (Some(a), Some(b)) => (a - b).abs() > ALMOST_ZERO,
        _ => true,
    }
}

/// First band whose `[min_grade, max_grade)` interval contains `grade`.
pub fn feedback_for_grade(bands: &[FeedbackBand], grade: f64) -> Option<&FeedbackBand> {
    bands
        .iter()
        .find(|b| b.min_grade <= grade && grade < b.max_grade)
}
