use crate::batch::{run_batch, BatchPolicy, BatchReport, ItemError, Progress};
use crate::db::{self, PlannerRunItem, PlannerRunRecord};
use crate::gateway::{CourseSlipGateway, CreateCourseSlip, GatewayError, GatewayReply};
use crate::model::{Course, EntityId, Snapshot, Student};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub const DEPARTMENT_MATCH_LIMIT: usize = 6;
pub const YEAR_FALLBACK_LIMIT: usize = 4;

/// Students with no course slip for `semester_id`, in snapshot order. Any
/// slip counts, approved or not. No semester means no candidates.
pub fn students_without_course_slips(
    snapshot: &Snapshot,
    semester_id: Option<EntityId>,
) -> Vec<&Student> {
    let Some(semester_id) = semester_id else {
        return Vec::new();
    };
    snapshot
        .students
        .iter()
        .filter(|student| {
            !snapshot
                .course_slips
                .iter()
                .any(|slip| slip.student == Some(student.id) && slip.semester == Some(semester_id))
        })
        .collect()
}

pub fn filter_by_department(students: Vec<&Student>, department_id: Option<EntityId>) -> Vec<&Student> {
    match department_id {
        Some(dept) => students
            .into_iter()
            .filter(|s| s.department == Some(dept))
            .collect(),
        None => students,
    }
}

/// Catalog-order course choice: same department and year, first semester or
/// unspecified, capped at six. Without any such course, any course of the
/// student's year, capped at four, even from another department.
pub fn appropriate_courses_for_student<'a>(student: &Student, courses: &'a [Course]) -> Vec<&'a Course> {
    let matching: Vec<&Course> = courses
        .iter()
        .filter(|c| {
            c.department == student.department
                && c.year == student.year
                && matches!(c.semester, None | Some(0) | Some(1))
        })
        .take(DEPARTMENT_MATCH_LIMIT)
        .collect();
    if !matching.is_empty() {
        return matching;
    }
    tracing::debug!(
        student = %student.student_number,
        year = ?student.year,
        "no department courses, falling back to year match"
    );
    courses
        .iter()
        .filter(|c| c.year == student.year)
        .take(YEAR_FALLBACK_LIMIT)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSlip {
    pub student_id: EntityId,
    pub student_label: String,
    pub course_ids: Vec<EntityId>,
    pub course_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentPlan {
    pub semester_id: EntityId,
    pub department_id: Option<EntityId>,
    pub slips: Vec<PlannedSlip>,
}

impl AssignmentPlan {
    pub fn build(snapshot: &Snapshot, semester_id: EntityId, department_id: Option<EntityId>) -> Self {
        let candidates = filter_by_department(
            students_without_course_slips(snapshot, Some(semester_id)),
            department_id,
        );
        let slips = candidates
            .into_iter()
            .map(|student| {
                let chosen = appropriate_courses_for_student(student, &snapshot.courses);
                PlannedSlip {
                    student_id: student.id,
                    student_label: student.label(),
                    course_ids: chosen.iter().map(|c| c.id).collect(),
                    course_codes: chosen.iter().map(|c| c.code.clone()).collect(),
                }
            })
            .collect();
        AssignmentPlan {
            semester_id,
            department_id,
            slips,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    Ready,
    Running,
    Done,
    Aborted,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Ready => "READY",
            Phase::Running => "RUNNING",
            Phase::Done => "DONE",
            Phase::Aborted => "ABORTED",
        }
    }
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("cannot {action} while planner is {}", .phase.as_str())]
    InvalidState { action: &'static str, phase: Phase },
    #[error("Please select a semester for auto-assignment.")]
    NoSemester,
    #[error("semester not found: {0}")]
    UnknownSemester(EntityId),
    #[error("All students already have course slips for the selected semester.")]
    NoCandidates,
    #[error("snapshot changed since the semester was selected; select again")]
    StaleSnapshot,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl PlannerError {
    pub fn code(&self) -> &'static str {
        match self {
            PlannerError::InvalidState { .. } => "invalid_state",
            PlannerError::NoSemester | PlannerError::Validation(_) => "validation_failed",
            PlannerError::UnknownSemester(_) => "not_found",
            PlannerError::NoCandidates => "no_candidates",
            PlannerError::StaleSnapshot => "stale_snapshot",
            PlannerError::Gateway(e) => e.code(),
        }
    }
}

#[derive(Debug, Error)]
enum AssignError {
    #[error("No appropriate courses found")]
    NoCourses,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ItemError for AssignError {
    fn is_systemic(&self) -> bool {
        match self {
            AssignError::NoCourses => false,
            AssignError::Gateway(e) => e.is_systemic(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: String,
    pub state: Phase,
    pub semester_id: EntityId,
    pub department_id: Option<EntityId>,
    pub report: BatchReport,
    pub progress: Vec<Progress>,
    pub started_at: String,
    pub finished_at: String,
    #[serde(skip)]
    slips: Vec<PlannedSlip>,
}

impl RunOutcome {
    pub fn to_record(&self) -> PlannerRunRecord {
        let items = self
            .slips
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < self.report.processed)
            .map(|(i, slip)| {
                let failure = self.report.failed(i);
                PlannerRunItem {
                    student_id: slip.student_id,
                    student_label: slip.student_label.clone(),
                    course_ids: slip.course_ids.clone(),
                    outcome: if failure.is_some() { "error" } else { "created" }.to_string(),
                    message: failure.map(|f| f.message.clone()),
                }
            })
            .collect();
        PlannerRunRecord {
            id: self.run_id.clone(),
            semester_id: self.semester_id,
            department_id: self.department_id,
            state: self.state.as_str().to_string(),
            total: self.report.total,
            success_count: self.report.success_count,
            error_count: self.report.error_count,
            abort_reason: self.report.abort_reason.clone(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            items,
        }
    }
}

#[derive(Debug, Clone)]
struct Selection {
    generation: i64,
    plan: AssignmentPlan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerStatus<'a> {
    pub state: Phase,
    pub plan: Option<&'a AssignmentPlan>,
    pub last_run: Option<&'a RunOutcome>,
}

/// IDLE -> READY -> RUNNING -> DONE | ABORTED -> IDLE.
#[derive(Debug)]
pub struct AssignmentPlanner {
    phase: Phase,
    selection: Option<Selection>,
    last_run: Option<RunOutcome>,
}

impl Default for AssignmentPlanner {
    fn default() -> Self {
        AssignmentPlanner {
            phase: Phase::Idle,
            selection: None,
            last_run: None,
        }
    }
}

impl AssignmentPlanner {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> PlannerStatus<'_> {
        PlannerStatus {
            state: self.phase,
            plan: self.selection.as_ref().map(|s| &s.plan),
            last_run: self.last_run.as_ref(),
        }
    }

    fn transition(&mut self, next: Phase) {
        tracing::info!(from = self.phase.as_str(), to = next.as_str(), "planner state");
        self.phase = next;
    }

    /// Selecting again while READY replaces the selection.
    pub fn select(
        &mut self,
        snapshot: &Snapshot,
        generation: i64,
        semester_id: Option<EntityId>,
        department_id: Option<EntityId>,
    ) -> Result<&AssignmentPlan, PlannerError> {
        if !matches!(self.phase, Phase::Idle | Phase::Ready) {
            return Err(PlannerError::InvalidState {
                action: "select",
                phase: self.phase,
            });
        }
        let semester_id = semester_id.ok_or(PlannerError::NoSemester)?;
        if snapshot.semester(semester_id).is_none() {
            return Err(PlannerError::UnknownSemester(semester_id));
        }
        let plan = AssignmentPlan::build(snapshot, semester_id, department_id);
        if plan.slips.is_empty() {
            return Err(PlannerError::NoCandidates);
        }
        self.selection = Some(Selection { generation, plan });
        if self.phase != Phase::Ready {
            self.transition(Phase::Ready);
        }
        self.selection
            .as_ref()
            .map(|s| &s.plan)
            .ok_or(PlannerError::NoCandidates)
    }

    /// Confirms the selection and runs the batch to completion. The plan is
    /// rebuilt from the current snapshot so students who got a slip since
    /// selection are not submitted again.
    pub fn run<G: CourseSlipGateway>(
        &mut self,
        snapshot: &Snapshot,
        generation: i64,
        gateway: &mut G,
        policy: &BatchPolicy,
    ) -> Result<&RunOutcome, PlannerError> {
        if self.phase != Phase::Ready {
            return Err(PlannerError::InvalidState {
                action: "run",
                phase: self.phase,
            });
        }
        let Some(selection) = self.selection.take() else {
            self.transition(Phase::Idle);
            return Err(PlannerError::NoSemester);
        };
        if selection.generation != generation {
            tracing::warn!(
                selected = selection.generation,
                current = generation,
                "planner selection is stale"
            );
            self.transition(Phase::Idle);
            return Err(PlannerError::StaleSnapshot);
        }
        let plan = AssignmentPlan::build(
            snapshot,
            selection.plan.semester_id,
            selection.plan.department_id,
        );
        if plan.slips.is_empty() {
            self.transition(Phase::Idle);
            return Err(PlannerError::NoCandidates);
        }

        self.transition(Phase::Running);
        let started_at = db::now_stamp();
        let mut trail = Vec::new();
        let report = run_batch(
            &plan.slips,
            policy,
            |slip| slip.student_label.clone(),
            |slip| -> Result<(), AssignError> {
                if slip.course_ids.is_empty() {
                    return Err(AssignError::NoCourses);
                }
                let reply = gateway.create_course_slip(&CreateCourseSlip {
                    student_id: slip.student_id,
                    course_ids: slip.course_ids.clone(),
                    semester_id: plan.semester_id,
                })?;
                reply.into_result()?;
                Ok(())
            },
            |p| {
                tracing::debug!(percent = p.percent, current = %p.current, "assignment progress");
                trail.push(p.clone());
            },
        );

        let next = if report.aborted { Phase::Aborted } else { Phase::Done };
        self.transition(next);
        self.last_run = Some(RunOutcome {
            run_id: Uuid::new_v4().to_string(),
            state: next,
            semester_id: plan.semester_id,
            department_id: plan.department_id,
            report,
            progress: trail,
            started_at,
            finished_at: db::now_stamp(),
            slips: plan.slips,
        });
        self.last_run.as_ref().ok_or(PlannerError::NoCandidates)
    }

    pub fn dismiss(&mut self) -> Result<(), PlannerError> {
        if self.phase == Phase::Running {
            return Err(PlannerError::InvalidState {
                action: "dismiss",
                phase: self.phase,
            });
        }
        self.selection = None;
        if self.phase != Phase::Idle {
            self.transition(Phase::Idle);
        }
        Ok(())
    }
}

/// Manual assignment of a chosen course set to one student.
pub fn assign_courses_to_student<G: CourseSlipGateway>(
    gateway: &mut G,
    student_id: Option<EntityId>,
    semester_id: Option<EntityId>,
    course_ids: &[EntityId],
) -> Result<GatewayReply, PlannerError> {
    let (Some(student_id), Some(semester_id)) = (student_id, semester_id) else {
        return Err(PlannerError::Validation(
            "Please select a student, semester, and at least one course.".to_string(),
        ));
    };
    if course_ids.is_empty() {
        return Err(PlannerError::Validation(
            "Please select a student, semester, and at least one course.".to_string(),
        ));
    }
    let reply = gateway.create_course_slip(&CreateCourseSlip {
        student_id,
        course_ids: course_ids.to_vec(),
        semester_id,
    })?;
    if !reply.success {
        return Err(PlannerError::Gateway(GatewayError::Unsuccessful(reply.message)));
    }
    Ok(reply)
}
