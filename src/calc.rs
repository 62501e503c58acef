use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

pub const INVALID_INPUT: &str = "invalid_input";

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for CalcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CalcError {}

/// Category ids arrive from the store as either strings or integers.
/// Integral floats such as `1.0` name the same category as `1`.
pub fn category_id_from_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i.to_string());
            }
            if let Some(u) = n.as_u64() {
                return Some(u.to_string());
            }
            let f = n.as_f64()?;
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Some((f as i64).to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

fn deserialize_category_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    category_id_from_value(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!(
            "category id must be a string or integer, got {}",
            raw
        ))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCategory {
    #[serde(deserialize_with = "deserialize_category_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "weight")]
    pub weight_percent: f64,
}

impl GradeCategory {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight_percent: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight_percent,
        }
    }
}

/// One gradable event (assignment submission or attendance session) as
/// resolved by a grader. Penalty fields only matter when `is_late` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedItem {
    #[serde(deserialize_with = "deserialize_category_id")]
    pub category_id: String,
    pub points_earned: f64,
    pub max_points: f64,
    #[serde(default)]
    pub is_late: bool,
    #[serde(default)]
    pub late_penalty_percent: f64,
    #[serde(default)]
    pub late_intervals_elapsed: i64,
}

impl GradedItem {
    pub fn on_time(category_id: impl Into<String>, points_earned: f64, max_points: f64) -> Self {
        Self {
            category_id: category_id.into(),
            points_earned,
            max_points,
            is_late: false,
            late_penalty_percent: 0.0,
            late_intervals_elapsed: 0,
        }
    }

    pub fn late(mut self, penalty_percent: f64, intervals_elapsed: i64) -> Self {
        self.is_late = true;
        self.late_penalty_percent = penalty_percent;
        self.late_intervals_elapsed = intervals_elapsed;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedItem {
    pub final_points: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseFinalGrade {
    pub weighted_percentage: f64,
    pub letter_grade: String,
}

/// Applies the late penalty and converts points to a percentage.
///
/// The penalty is `late_penalty_percent * late_intervals_elapsed` percentage
/// points of `max_points`, floored so the result never drops below zero.
/// Over-credit (`points_earned > max_points`) passes through unclamped.
pub fn grade_submission(item: &GradedItem) -> Result<FinalizedItem, CalcError> {
    if !(item.max_points > 0.0) || !item.max_points.is_finite() {
        return Err(
            CalcError::new(INVALID_INPUT, "maxPoints must be greater than zero")
                .with_details(json!({ "maxPoints": item.max_points })),
        );
    }

    let final_points = if item.is_late {
        let penalty_points = item.late_penalty_percent * (item.late_intervals_elapsed as f64);
        (item.points_earned - penalty_points * item.max_points / 100.0).max(0.0)
    } else {
        item.points_earned
    };

    Ok(FinalizedItem {
        final_points,
        percentage: 100.0 * final_points / item.max_points,
    })
}

pub const LETTER_F: &str = "F";

/// Inclusive lower bounds, highest first.
static LETTER_BANDS: [(f64, &str); 12] = [
    (97.0, "A+"),
    (93.0, "A"),
    (90.0, "A-"),
    (87.0, "B+"),
    (83.0, "B"),
    (80.0, "B-"),
    (77.0, "C+"),
    (73.0, "C"),
    (70.0, "C-"),
    (67.0, "D+"),
    (63.0, "D"),
    (60.0, "D-"),
];

pub fn letter_grade(percentage: f64) -> &'static str {
    LETTER_BANDS
        .iter()
        .find(|(lower, _)| percentage >= *lower)
        .map(|(_, letter)| *letter)
        .unwrap_or(LETTER_F)
}

/// Every letter `letter_grade` can return, best first.
pub fn letter_scale() -> impl Iterator<Item = &'static str> {
    LETTER_BANDS
        .iter()
        .map(|(_, letter)| *letter)
        .chain(std::iter::once(LETTER_F))
}

/// `floor(x * 10^d + 0.5) / 10^d`. Only used for display fields.
pub fn round_half_up(x: f64, decimals: u32) -> f64 {
    let scale = 10_f64.powi(decimals as i32);
    ((scale * x) + 0.5).floor() / scale
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryContribution {
    pub category_id: String,
    pub name: String,
    pub weight_percent: f64,
    pub item_count: usize,
    pub mean_percentage: Option<f64>,
    pub weighted_contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseBreakdown {
    #[serde(flatten)]
    pub grade: CourseFinalGrade,
    pub per_category: Vec<CategoryContribution>,
    pub configured_weight_percent: f64,
    pub graded_weight_percent: f64,
    /// Items that could not be graded (e.g. `maxPoints <= 0`).
    pub skipped_items: usize,
    /// Items whose category is not configured for the course.
    pub unmatched_items: usize,
}

impl CourseBreakdown {
    pub fn has_graded_work(&self) -> bool {
        self.per_category
            .iter()
            .any(|c| c.mean_percentage.is_some())
    }
}

/// Weighted course grade plus the per-category numbers behind it.
///
/// Categories with no gradable items are skipped: they add neither weight
/// nor score, so the total is "earned so far" rather than a projection.
pub fn aggregate_course_breakdown(
    items: &[GradedItem],
    categories: &[GradeCategory],
) -> CourseBreakdown {
    let mut per_id: HashMap<&str, (f64, usize)> = HashMap::new(); // sum, count
    let mut skipped_items = 0_usize;
    for item in items {
        match grade_submission(item) {
            Ok(finalized) => {
                let entry = per_id.entry(item.category_id.as_str()).or_insert((0.0, 0));
                entry.0 += finalized.percentage;
                entry.1 += 1;
            }
            Err(_) => skipped_items += 1,
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut per_category: Vec<CategoryContribution> = Vec::with_capacity(categories.len());
    let mut weighted_percentage = 0.0_f64;
    let mut configured_weight_percent = 0.0_f64;
    let mut graded_weight_percent = 0.0_f64;

    for c in categories {
        // First definition of a duplicated id wins.
        if !seen.insert(c.id.as_str()) {
            continue;
        }
        configured_weight_percent += c.weight_percent;

        let (mean_percentage, item_count) = match per_id.get(c.id.as_str()) {
            Some(&(sum, count)) if count > 0 => (Some(sum / (count as f64)), count),
            _ => (None, 0),
        };
        let weighted_contribution = match mean_percentage {
            Some(mean) => {
                graded_weight_percent += c.weight_percent;
                mean * c.weight_percent / 100.0
            }
            None => 0.0,
        };
        weighted_percentage += weighted_contribution;

        per_category.push(CategoryContribution {
            category_id: c.id.clone(),
            name: c.name.clone(),
            weight_percent: c.weight_percent,
            item_count,
            mean_percentage,
            weighted_contribution,
        });
    }

    let unmatched_items = per_id
        .iter()
        .filter(|(id, _)| !seen.contains(*id))
        .map(|(_, (_, count))| *count)
        .sum();

    CourseBreakdown {
        grade: CourseFinalGrade {
            weighted_percentage,
            letter_grade: letter_grade(weighted_percentage).to_string(),
        },
        per_category,
        configured_weight_percent,
        graded_weight_percent,
        skipped_items,
        unmatched_items,
    }
}

pub fn aggregate_course_grade(
    items: &[GradedItem],
    categories: &[GradeCategory],
) -> CourseFinalGrade {
    aggregate_course_breakdown(items, categories).grade
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryProblem {
    pub category_id: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryValidation {
    pub weight_total: f64,
    pub sums_to_100: bool,
    pub problems: Vec<CategoryProblem>,
}

impl CategoryValidation {
    pub fn is_valid(&self) -> bool {
        self.sums_to_100 && self.problems.is_empty()
    }
}

/// Reports configuration problems without rejecting anything; the
/// aggregator accepts whatever the caller persists.
pub fn validate_categories(categories: &[GradeCategory]) -> CategoryValidation {
    let mut problems = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut weight_total = 0.0_f64;

    for c in categories {
        if !seen.insert(c.id.as_str()) {
            problems.push(CategoryProblem {
                category_id: c.id.clone(),
                code: "duplicate_id",
                message: format!("category id {} is defined more than once", c.id),
            });
            continue;
        }
        weight_total += c.weight_percent;
        if c.name.trim().is_empty() {
            problems.push(CategoryProblem {
                category_id: c.id.clone(),
                code: "blank_name",
                message: "category name must not be blank".to_string(),
            });
        }
        if c.weight_percent < 0.0 {
            problems.push(CategoryProblem {
                category_id: c.id.clone(),
                code: "negative_weight",
                message: format!("weight {} is below 0", c.weight_percent),
            });
        } else if c.weight_percent > 100.0 {
            problems.push(CategoryProblem {
                category_id: c.id.clone(),
                code: "weight_above_100",
                message: format!("weight {} is above 100", c.weight_percent),
            });
        }
    }

    CategoryValidation {
        weight_total,
        sums_to_100: (weight_total - 100.0).abs() <= WEIGHT_SUM_TOLERANCE,
        problems,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentItems {
    pub student_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub items: Vec<GradedItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFinal {
    pub student_id: String,
    pub display_name: Option<String>,
    pub final_percentage: Option<f64>,
    pub letter_grade: Option<String>,
    pub graded_item_count: usize,
    pub skipped_items: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryClassAverage {
    pub category_id: String,
    pub name: String,
    pub weight_percent: f64,
    pub class_avg: Option<f64>,
    pub student_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LetterCount {
    pub letter: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub per_student: Vec<StudentFinal>,
    pub per_category: Vec<CategoryClassAverage>,
    pub graded_student_count: usize,
    pub class_mean: Option<f64>,
    pub class_median: Option<f64>,
    pub letter_distribution: Vec<LetterCount>,
}

fn compute_median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Course grades for a whole section. Students without graded work in any
/// configured category get no final grade and stay out of the class stats.
pub fn compute_class_summary(
    students: &[StudentItems],
    categories: &[GradeCategory],
) -> ClassSummary {
    let mut per_student: Vec<StudentFinal> = Vec::with_capacity(students.len());
    let mut finals: Vec<f64> = Vec::new();
    let mut letter_counts: HashMap<&'static str, usize> = HashMap::new();
    let mut category_totals: HashMap<String, (f64, usize)> = HashMap::new(); // sum of means, students

    for s in students {
        let breakdown = aggregate_course_breakdown(&s.items, categories);
        for c in &breakdown.per_category {
            if let Some(mean) = c.mean_percentage {
                let entry = category_totals
                    .entry(c.category_id.clone())
                    .or_insert((0.0, 0));
                entry.0 += mean;
                entry.1 += 1;
            }
        }

        let graded_item_count: usize = breakdown.per_category.iter().map(|c| c.item_count).sum();
        let final_percentage = if breakdown.has_graded_work() {
            let pct = breakdown.grade.weighted_percentage;
            finals.push(pct);
            *letter_counts.entry(letter_grade(pct)).or_insert(0) += 1;
            Some(pct)
        } else {
            None
        };

        per_student.push(StudentFinal {
            student_id: s.student_id.clone(),
            display_name: s.display_name.clone(),
            final_percentage,
            letter_grade: final_percentage.map(|p| letter_grade(p).to_string()),
            graded_item_count,
            skipped_items: breakdown.skipped_items,
        });
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let per_category: Vec<CategoryClassAverage> = categories
        .iter()
        .filter(|c| seen.insert(c.id.as_str()))
        .map(|c| {
            let (class_avg, student_count) = match category_totals.get(&c.id) {
                Some(&(sum, count)) if count > 0 => (Some(sum / (count as f64)), count),
                _ => (None, 0),
            };
            CategoryClassAverage {
                category_id: c.id.clone(),
                name: c.name.clone(),
                weight_percent: c.weight_percent,
                class_avg,
                student_count,
            }
        })
        .collect();

    let class_mean = if finals.is_empty() {
        None
    } else {
        Some(finals.iter().sum::<f64>() / (finals.len() as f64))
    };

    let letter_distribution = letter_scale()
        .map(|letter| LetterCount {
            letter,
            count: letter_counts.get(letter).copied().unwrap_or(0),
        })
        .collect();

    ClassSummary {
        per_student,
        per_category,
        graded_student_count: finals.len(),
        class_mean,
        class_median: compute_median(&finals),
        letter_distribution,
    }
}
