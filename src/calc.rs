/// Grades live on a closed 1..=10 scale.
pub const GRADE_MIN: f64 = 1.0;
pub const GRADE_MAX: f64 = 10.0;

/// A storable grade is finite and inside the 1..=10 scale.
pub fn grade_is_valid(value: f64) -> bool {
    value.is_finite() && (GRADE_MIN..=GRADE_MAX).contains(&value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoScore {
    pub score: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Scores submitted answers positionally against the question order.
/// Comparison is exact and case-sensitive; a missing answer at an index
/// counts as incorrect, extra answers past the last question are ignored.
pub fn auto_score(correct: &[String], answers: &[String]) -> AutoScore {
    let total = correct.len();
    let score = correct
        .iter()
        .enumerate()
        .filter(|(i, want)| answers.get(*i).map(|got| got == *want).unwrap_or(false))
        .count();
    let percentage = if total == 0 {
        0.0
    } else {
        (score as f64 / total as f64) * 100.0
    };
    AutoScore {
        score,
        total,
        percentage,
    }
}
