use crate::model::{Course, EntityId, Grade, Student};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const MAX_GRADE_POINT: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LetterGrade {
    APlus,
    A,
    AMinus,
    BPlus,
    B,
    BMinus,
    CPlus,
    C,
    CMinus,
    D,
    F,
    Incomplete,
}

impl LetterGrade {
    pub fn parse(raw: &str) -> Option<Self> {
        let g = match raw.trim().to_ascii_uppercase().as_str() {
            "A+" => LetterGrade::APlus,
            "A" => LetterGrade::A,
            "A-" => LetterGrade::AMinus,
            "B+" => LetterGrade::BPlus,
            "B" => LetterGrade::B,
            "B-" => LetterGrade::BMinus,
            "C+" => LetterGrade::CPlus,
            "C" => LetterGrade::C,
            "C-" => LetterGrade::CMinus,
            "D" => LetterGrade::D,
            "F" => LetterGrade::F,
            "I" => LetterGrade::Incomplete,
            _ => return None,
        };
        Some(g)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LetterGrade::APlus => "A+",
            LetterGrade::A => "A",
            LetterGrade::AMinus => "A-",
            LetterGrade::BPlus => "B+",
            LetterGrade::B => "B",
            LetterGrade::BMinus => "B-",
            LetterGrade::CPlus => "C+",
            LetterGrade::C => "C",
            LetterGrade::CMinus => "C-",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
            LetterGrade::Incomplete => "I",
        }
    }

    /// Incomplete carries no grade point.
    pub fn grade_point(self) -> Option<f64> {
        let p = match self {
            LetterGrade::APlus | LetterGrade::A => 4.00,
            LetterGrade::AMinus => 3.75,
            LetterGrade::BPlus => 3.50,
            LetterGrade::B => 3.00,
            LetterGrade::BMinus => 2.75,
            LetterGrade::CPlus => 2.50,
            LetterGrade::C => 2.00,
            LetterGrade::CMinus => 1.75,
            LetterGrade::D => 1.00,
            LetterGrade::F => 0.00,
            LetterGrade::Incomplete => return None,
        };
        Some(p)
    }
}

pub fn clamp_grade_point(p: f64) -> f64 {
    if p.is_nan() {
        return 0.0;
    }
    p.clamp(0.0, MAX_GRADE_POINT)
}

/// Rounds half away from zero on the shortest decimal representation of
/// `value`: the shift is done by rewriting the exponent in text, so 1.005
/// becomes 100.5 (not 100.49999999999999) and rounds to 1.01.
pub fn round_decimal(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10f64.powi(decimals as i32);
    let shifted = format!("{}e{}", value, decimals)
        .parse::<f64>()
        .unwrap_or(value * scale);
    let rounded = shifted.round();
    format!("{}e-{}", rounded, decimals)
        .parse::<f64>()
        .unwrap_or(rounded / scale)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordGrade {
    pub course_id: Option<EntityId>,
    pub course_code: String,
    pub grade: Option<String>,
    pub credits: i64,
    pub grade_point: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicRecord {
    pub student_id: EntityId,
    pub student_number: String,
    pub student_name: String,
    pub department_id: Option<EntityId>,
    pub department: String,
    pub year: Option<i64>,
    pub gpa: f64,
    pub total_credits: i64,
    pub total_quality_points: f64,
    pub total_courses: usize,
    pub grades: Vec<RecordGrade>,
}

fn course_index(courses: &[Course]) -> HashMap<EntityId, &Course> {
    let mut idx = HashMap::with_capacity(courses.len());
    for c in courses {
        // First occurrence wins, like a linear find over the fetched list.
        idx.entry(c.id).or_insert(c);
    }
    idx
}

pub fn compute_academic_records(
    students: &[Student],
    grades: &[Grade],
    courses: &[Course],
) -> Vec<AcademicRecord> {
    let courses_by_id = course_index(courses);

    students
        .iter()
        .map(|student| {
            let mut total_credits: i64 = 0;
            let mut total_quality_points: f64 = 0.0;
            let mut lines: Vec<RecordGrade> = Vec::new();

            for g in grades {
                if g.student != Some(student.id) || !g.published() {
                    continue;
                }
                let Some(point) = g.grade_point else {
                    continue;
                };
                let course = g.course.and_then(|id| courses_by_id.get(&id).copied());
                let credits = course.map(|c| c.credits).unwrap_or(0);
                let point = clamp_grade_point(point);
                total_credits += credits;
                total_quality_points += credits as f64 * point;
                lines.push(RecordGrade {
                    course_id: g.course,
                    course_code: course
                        .map(|c| c.code.clone())
                        .unwrap_or_else(|| "N/A".to_string()),
                    grade: g.letter.clone(),
                    credits,
                    grade_point: point,
                });
            }

            let gpa = if total_credits > 0 {
                round_decimal(total_quality_points / total_credits as f64, 2)
            } else {
                0.0
            };

            AcademicRecord {
                student_id: student.id,
                student_number: student.student_number.clone(),
                student_name: student.full_name(),
                department_id: student.department,
                department: student
                    .department_name
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
                year: student.year,
                gpa,
                total_credits,
                total_quality_points: round_decimal(total_quality_points, 2),
                total_courses: lines.len(),
                grades: lines,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentStatistic {
    pub department_id: Option<EntityId>,
    pub department_name: String,
    pub total_students: usize,
    pub total_grades: usize,
    pub grade_distribution: BTreeMap<String, usize>,
    pub grade_percentages: BTreeMap<String, f64>,
    pub average_gpa: f64,
}

fn department_label(student: &Student, courses: &[Course]) -> String {
    if let Some(name) = &student.department_name {
        return name.clone();
    }
    let Some(dept) = student.department else {
        return "Not Assigned".to_string();
    };
    courses
        .iter()
        .filter(|c| c.department == Some(dept))
        .find_map(|c| c.department_name.clone())
        .unwrap_or_else(|| format!("Department {}", dept))
}

/// Students without a department are grouped under "Not Assigned", listed last.
pub fn compute_department_statistics(
    students: &[Student],
    grades: &[Grade],
    courses: &[Course],
) -> Vec<DepartmentStatistic> {
    let mut buckets: HashMap<Option<EntityId>, (DepartmentStatistic, Vec<f64>)> = HashMap::new();
    let mut student_dept: HashMap<EntityId, Option<EntityId>> = HashMap::new();

    for s in students {
        student_dept.entry(s.id).or_insert(s.department);
        let (stat, _) = buckets.entry(s.department).or_insert_with(|| {
            (
                DepartmentStatistic {
                    department_id: s.department,
                    department_name: department_label(s, courses),
                    total_students: 0,
                    total_grades: 0,
                    grade_distribution: BTreeMap::new(),
                    grade_percentages: BTreeMap::new(),
                    average_gpa: 0.0,
                },
                Vec::new(),
            )
        });
        stat.total_students += 1;
    }

    for g in grades {
        if !g.published() {
            continue;
        }
        let Some(dept) = g.student.and_then(|id| student_dept.get(&id)) else {
            continue;
        };
        let Some((stat, points)) = buckets.get_mut(dept) else {
            continue;
        };
        stat.total_grades += 1;
        // Missing grade points count as zero here, unlike the per-student GPA.
        points.push(clamp_grade_point(g.grade_point.unwrap_or(0.0)));
        if let Some(letter) = &g.letter {
            *stat.grade_distribution.entry(letter.clone()).or_insert(0) += 1;
        }
    }

    let mut out: Vec<DepartmentStatistic> = buckets
        .into_values()
        .map(|(mut stat, points)| {
            let letters_total: usize = stat.grade_distribution.values().sum();
            stat.grade_percentages = stat
                .grade_distribution
                .iter()
                .map(|(letter, count)| {
                    let pct = if letters_total > 0 {
                        round_decimal(*count as f64 / letters_total as f64 * 100.0, 1)
                    } else {
                        0.0
                    };
                    (letter.clone(), pct)
                })
                .collect();
            stat.average_gpa = if points.is_empty() {
                0.0
            } else {
                round_decimal(points.iter().sum::<f64>() / points.len() as f64, 2)
            };
            stat
        })
        .collect();
    out.sort_by_key(|s| (s.department_id.is_none(), s.department_id));
    out
}

/// Weighted GPA over the grades a student sees: published unless explicitly
/// unpublished, with a grade point and positive credits. `None` when no
/// credits qualify.
pub fn weighted_gpa(grades: &[Grade]) -> Option<f64> {
    let mut quality_points = 0.0;
    let mut credits = 0.0;
    for g in grades {
        if g.is_published == Some(false) {
            continue;
        }
        let Some(points) = g.grade_point else {
            continue;
        };
        let Some(c) = g.course_credits.filter(|c| *c > 0.0) else {
            continue;
        };
        quality_points += clamp_grade_point(points) * c;
        credits += c;
    }
    if credits == 0.0 {
        return None;
    }
    Some((quality_points / credits).min(MAX_GRADE_POINT))
}

/// Rounds half away from zero on the decimal text first, so a raw 2.675
/// shows as "2.68" where a plain two-place format gives "2.67".
pub fn format_gpa(gpa: f64) -> String {
    format!("{:.2}", round_decimal(clamp_grade_point(gpa), 2))
}

pub fn compute_gpa(grades: &[Grade]) -> String {
    match weighted_gpa(grades) {
        Some(gpa) => format_gpa(gpa),
        None => "0.00".to_string(),
    }
}

pub fn quality_points(grade: &Grade) -> Option<f64> {
    if grade.is_published == Some(false) {
        return None;
    }
    let points = grade.grade_point?;
    let credits = grade.course_credits.filter(|c| *c > 0.0)?;
    Some(round_decimal(clamp_grade_point(points) * credits, 2))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpaBand {
    Excellent,
    VeryGood,
    Good,
    Satisfactory,
    NeedsImprovement,
}

impl GpaBand {
    pub fn of(gpa: f64) -> Self {
        if gpa >= 3.5 {
            GpaBand::Excellent
        } else if gpa >= 3.0 {
            GpaBand::VeryGood
        } else if gpa >= 2.5 {
            GpaBand::Good
        } else if gpa >= 2.0 {
            GpaBand::Satisfactory
        } else {
            GpaBand::NeedsImprovement
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewGrade {
    pub grade_id: EntityId,
    pub course_id: Option<EntityId>,
    pub course_code: String,
    pub course_name: String,
    pub semester_id: Option<EntityId>,
    pub grade: Option<String>,
    pub grade_point: Option<f64>,
    pub credits: Option<f64>,
    pub quality_points: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentOverview {
    pub student_id: EntityId,
    pub student_number: String,
    pub student_name: String,
    pub gpa: String,
    pub band: GpaBand,
    pub completed_credits: f64,
    pub graded_courses: usize,
    pub grades: Vec<OverviewGrade>,
}

/// What a student sees on their own dashboard. Grades lacking
/// `course_credits` take the credits from the course catalog.
pub fn student_overview(student: &Student, grades: &[Grade], courses: &[Course]) -> StudentOverview {
    let courses_by_id = course_index(courses);
    let own: Vec<Grade> = grades
        .iter()
        .filter(|g| g.student == Some(student.id) && g.is_published != Some(false))
        .map(|g| {
            let mut g = g.clone();
            if g.course_credits.is_none() {
                g.course_credits = g
                    .course
                    .and_then(|id| courses_by_id.get(&id))
                    .map(|c| c.credits as f64);
            }
            g
        })
        .collect();

    let gpa_value = weighted_gpa(&own).unwrap_or(0.0);
    let completed: Vec<&Grade> = own
        .iter()
        .filter(|g| {
            g.grade_point.map(|p| p > 0.0).unwrap_or(false)
                && g.course_credits.map(|c| c > 0.0).unwrap_or(false)
        })
        .collect();

    let lines = own
        .iter()
        .map(|g| {
            let course = g.course.and_then(|id| courses_by_id.get(&id).copied());
            OverviewGrade {
                grade_id: g.id,
                course_id: g.course,
                course_code: course
                    .map(|c| c.code.clone())
                    .unwrap_or_else(|| "N/A".to_string()),
                course_name: course
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| "Unknown Course".to_string()),
                semester_id: g.semester,
                grade: g.letter.clone(),
                grade_point: g.grade_point.map(clamp_grade_point),
                credits: g.course_credits,
                quality_points: quality_points(g),
            }
        })
        .collect();

    StudentOverview {
        student_id: student.id,
        student_number: student.student_number.clone(),
        student_name: student.full_name(),
        gpa: format_gpa(gpa_value),
        band: GpaBand::of(round_decimal(gpa_value, 2)),
        completed_credits: completed.iter().filter_map(|g| g.course_credits).sum(),
        graded_courses: completed.len(),
        grades: lines,
    }
}
