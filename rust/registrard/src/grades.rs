use crate::batch::{run_batch, BatchPolicy, BatchReport};
use crate::calc::LetterGrade;
use crate::gateway::{GatewayError, GradeGateway, GradeWrite};
use crate::model::{EntityId, Semester, Snapshot};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GradeEntryError {
    #[error("No grades to save.")]
    NothingToSave,
    #[error("Invalid grade '{letter}' for student {student}")]
    InvalidLetter { student: EntityId, letter: String },
    #[error("No unpublished grades found for this course in the current semester.")]
    NothingToPublish,
    #[error("No active semester found.")]
    NoActiveSemester,
    #[error("course not found: {0}")]
    UnknownCourse(EntityId),
}

impl GradeEntryError {
    pub fn code(&self) -> &'static str {
        match self {
            GradeEntryError::UnknownCourse(_) => "not_found",
            _ => "validation_failed",
        }
    }
}

pub fn active_semester(snapshot: &Snapshot) -> Option<&Semester> {
    snapshot.semesters.iter().find(|s| s.is_active)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "UPPERCASE")]
pub enum GradeSave {
    Post { body: GradeWrite },
    Put { id: EntityId, body: GradeWrite },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSave {
    pub student_id: EntityId,
    pub student_name: String,
    pub save: GradeSave,
}

fn student_name(snapshot: &Snapshot, id: EntityId) -> String {
    snapshot
        .student(id)
        .map(|s| s.full_name())
        .unwrap_or_else(|| format!("ID: {}", id))
}

/// Turns `student -> letter` entries into create-or-update writes. Blank
/// letters are skipped; saved grades are always unpublished.
pub fn plan_grade_saves(
    snapshot: &Snapshot,
    course_id: EntityId,
    semester_id: EntityId,
    entries: &[(EntityId, String)],
) -> Result<Vec<PlannedSave>, GradeEntryError> {
    if snapshot.course(course_id).is_none() {
        return Err(GradeEntryError::UnknownCourse(course_id));
    }
    let mut planned = Vec::new();
    for (student_id, raw) in entries {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let letter = LetterGrade::parse(raw).ok_or_else(|| GradeEntryError::InvalidLetter {
            student: *student_id,
            letter: raw.to_string(),
        })?;
        let body = GradeWrite {
            student: *student_id,
            course: course_id,
            semester: semester_id,
            grade: letter.as_str().to_string(),
            grade_point: letter.grade_point(),
            is_published: false,
        };
        let existing = snapshot.grades.iter().find(|g| {
            g.student == Some(*student_id)
                && g.course == Some(course_id)
                && g.semester == Some(semester_id)
        });
        planned.push(PlannedSave {
            student_id: *student_id,
            student_name: student_name(snapshot, *student_id),
            save: match existing {
                Some(g) => GradeSave::Put { id: g.id, body },
                None => GradeSave::Post { body },
            },
        });
    }
    if planned.is_empty() {
        return Err(GradeEntryError::NothingToSave);
    }
    Ok(planned)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedPublish {
    pub grade_id: EntityId,
    pub student_name: String,
}

pub fn plan_publish(
    snapshot: &Snapshot,
    course_id: EntityId,
    semester_id: EntityId,
) -> Result<Vec<PlannedPublish>, GradeEntryError> {
    let planned: Vec<PlannedPublish> = snapshot
        .grades
        .iter()
        .filter(|g| {
            g.course == Some(course_id) && g.semester == Some(semester_id) && !g.published()
        })
        .map(|g| PlannedPublish {
            grade_id: g.id,
            student_name: g
                .student
                .map(|id| student_name(snapshot, id))
                .unwrap_or_else(|| "Unknown student".to_string()),
        })
        .collect();
    if planned.is_empty() {
        return Err(GradeEntryError::NothingToPublish);
    }
    Ok(planned)
}

pub fn save_grades<G: GradeGateway>(gateway: &mut G, planned: &[PlannedSave]) -> BatchReport {
    run_batch(
        planned,
        &BatchPolicy::isolate_all(),
        |p| p.student_name.clone(),
        |p| -> Result<(), GatewayError> {
            let reply = match &p.save {
                GradeSave::Post { body } => gateway.create_grade(body)?,
                GradeSave::Put { id, body } => gateway.update_grade(*id, body)?,
            };
            reply.into_result().map(|_| ())
        },
        |_| {},
    )
}

pub fn publish_grades<G: GradeGateway>(gateway: &mut G, planned: &[PlannedPublish]) -> BatchReport {
    run_batch(
        planned,
        &BatchPolicy::isolate_all(),
        |p| p.student_name.clone(),
        |p| -> Result<(), GatewayError> {
            gateway
                .set_grade_published(p.grade_id, true)?
                .into_result()
                .map(|_| ())
        },
        |_| {},
    )
}
