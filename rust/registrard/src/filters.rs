use crate::calc::AcademicRecord;
use crate::model::{ref_id, Course, CourseSlip, EntityId, Grade, Registration, Snapshot, Student};
use crate::registration::{registration_status, RegistrationStatus};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct QueryError(pub String);

impl QueryError {
    pub fn code(&self) -> &'static str {
        "bad_params"
    }
}

pub type Predicate<'a, T> = Box<dyn Fn(&T) -> bool + 'a>;

/// A filter bag: each set field contributes one predicate.
pub trait Query<T> {
    fn predicates<'a>(&'a self, snapshot: &'a Snapshot) -> Vec<Predicate<'a, T>>;
}

pub fn apply_all<'i, T>(items: &'i [T], predicates: &[Predicate<'_, T>]) -> Vec<&'i T> {
    items
        .iter()
        .filter(|item| predicates.iter().all(|p| p(item)))
        .collect()
}

pub fn run_query<'i, T, Q: Query<T>>(query: &Q, snapshot: &Snapshot, items: &'i [T]) -> Vec<&'i T> {
    let predicates = query.predicates(snapshot);
    apply_all(items, &predicates)
}

fn fields<'v>(raw: Option<&'v Value>, allowed: &[&str]) -> Result<Option<&'v Map<String, Value>>, QueryError> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(obj) = raw.as_object() else {
        return Err(QueryError("filters must be an object".into()));
    };
    if let Some(unknown) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(QueryError(format!("unknown filter: {}", unknown)));
    }
    Ok(Some(obj))
}

fn is_unset(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => {
            let t = s.trim();
            t.is_empty() || t.eq_ignore_ascii_case("ALL")
        }
        _ => false,
    }
}

fn id_field(obj: Option<&Map<String, Value>>, key: &str) -> Result<Option<EntityId>, QueryError> {
    match obj.and_then(|o| o.get(key)) {
        None => Ok(None),
        Some(v) if is_unset(v) => Ok(None),
        Some(v) => ref_id(Some(v))
            .map(Some)
            .ok_or_else(|| QueryError(format!("filters.{} must be an integer or 'ALL'", key))),
    }
}

fn str_field(obj: Option<&Map<String, Value>>, key: &str) -> Result<Option<String>, QueryError> {
    match obj.and_then(|o| o.get(key)) {
        None => Ok(None),
        Some(v) if is_unset(v) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(QueryError(format!("filters.{} must be a string or null", key))),
    }
}

fn choice_field<E>(
    obj: Option<&Map<String, Value>>,
    key: &str,
    parse: fn(&str) -> Option<E>,
    expected: &str,
) -> Result<Option<E>, QueryError> {
    match str_field(obj, key)? {
        None => Ok(None),
        Some(s) => parse(&s)
            .map(Some)
            .ok_or_else(|| QueryError(format!("filters.{} must be one of {}", key, expected))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStatus {
    Active,
    Inactive,
}

impl ActiveStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ActiveStatus::Active),
            "inactive" => Some(ActiveStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approved,
    Pending,
}

impl Approval {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Approval::Approved),
            "pending" => Some(Approval::Pending),
            _ => None,
        }
    }

    fn matches(self, is_approved: bool) -> bool {
        match self {
            Approval::Approved => is_approved,
            Approval::Pending => !is_approved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lateness {
    Late,
    OnTime,
}

impl Lateness {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "late" => Some(Lateness::Late),
            "ontime" => Some(Lateness::OnTime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentQuery {
    pub department: Option<EntityId>,
    pub year: Option<i64>,
    pub status: Option<ActiveStatus>,
    pub registration_status: Option<RegistrationStatus>,
}

impl StudentQuery {
    pub fn parse(raw: Option<&Value>) -> Result<Self, QueryError> {
        let obj = fields(raw, &["department", "year", "status", "registrationStatus"])?;
        Ok(StudentQuery {
            department: id_field(obj, "department")?,
            year: id_field(obj, "year")?,
            status: choice_field(obj, "status", ActiveStatus::parse, "active, inactive")?,
            registration_status: choice_field(
                obj,
                "registrationStatus",
                RegistrationStatus::parse,
                "approved, pending, not_registered",
            )?,
        })
    }
}

impl Query<Student> for StudentQuery {
    fn predicates<'a>(&'a self, snapshot: &'a Snapshot) -> Vec<Predicate<'a, Student>> {
        let mut out: Vec<Predicate<'a, Student>> = Vec::new();
        if let Some(dept) = self.department {
            out.push(Box::new(move |s| s.department == Some(dept)));
        }
        if let Some(year) = self.year {
            out.push(Box::new(move |s| s.year == Some(year)));
        }
        if let Some(status) = self.status {
            out.push(Box::new(move |s| s.is_active == (status == ActiveStatus::Active)));
        }
        if let Some(wanted) = self.registration_status {
            out.push(Box::new(move |s| {
                registration_status(s, &snapshot.registrations) == wanted
            }));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseQuery {
    pub department: Option<EntityId>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
}

impl CourseQuery {
    pub fn parse(raw: Option<&Value>) -> Result<Self, QueryError> {
        let obj = fields(raw, &["department", "year", "semester"])?;
        Ok(CourseQuery {
            department: id_field(obj, "department")?,
            year: id_field(obj, "year")?,
            semester: id_field(obj, "semester")?,
        })
    }
}

impl Query<Course> for CourseQuery {
    fn predicates<'a>(&'a self, _snapshot: &'a Snapshot) -> Vec<Predicate<'a, Course>> {
        let mut out: Vec<Predicate<'a, Course>> = Vec::new();
        if let Some(dept) = self.department {
            out.push(Box::new(move |c| c.department == Some(dept)));
        }
        if let Some(year) = self.year {
            out.push(Box::new(move |c| c.year == Some(year)));
        }
        if let Some(sem) = self.semester {
            out.push(Box::new(move |c| c.semester == Some(sem)));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeQuery {
    pub department: Option<EntityId>,
    pub student: Option<EntityId>,
    pub semester: Option<EntityId>,
    pub academic_year: Option<EntityId>,
    pub course: Option<EntityId>,
}

impl GradeQuery {
    pub fn parse(raw: Option<&Value>) -> Result<Self, QueryError> {
        let obj = fields(
            raw,
            &["department", "student", "semester", "academicYear", "course"],
        )?;
        Ok(GradeQuery {
            department: id_field(obj, "department")?,
            student: id_field(obj, "student")?,
            semester: id_field(obj, "semester")?,
            academic_year: id_field(obj, "academicYear")?,
            course: id_field(obj, "course")?,
        })
    }
}

impl Query<Grade> for GradeQuery {
    fn predicates<'a>(&'a self, snapshot: &'a Snapshot) -> Vec<Predicate<'a, Grade>> {
        let mut out: Vec<Predicate<'a, Grade>> = Vec::new();
        if let Some(dept) = self.department {
            out.push(Box::new(move |g| {
                g.student
                    .and_then(|id| snapshot.student(id))
                    .is_some_and(|s| s.department == Some(dept))
            }));
        }
        if let Some(student) = self.student {
            out.push(Box::new(move |g| g.student == Some(student)));
        }
        if let Some(sem) = self.semester {
            out.push(Box::new(move |g| g.semester == Some(sem)));
        }
        if let Some(year) = self.academic_year {
            let in_year: Vec<EntityId> = snapshot
                .semesters
                .iter()
                .filter(|s| s.academic_year == Some(year))
                .map(|s| s.id)
                .collect();
            out.push(Box::new(move |g| {
                g.semester.is_some_and(|id| in_year.contains(&id))
            }));
        }
        if let Some(course) = self.course {
            out.push(Box::new(move |g| g.course == Some(course)));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationQuery {
    pub semester: Option<EntityId>,
    pub academic_year: Option<EntityId>,
    pub registration_type: Option<String>,
    pub approval: Option<Approval>,
    pub lateness: Option<Lateness>,
}

impl RegistrationQuery {
    pub fn parse(raw: Option<&Value>) -> Result<Self, QueryError> {
        let obj = fields(
            raw,
            &[
                "semester",
                "academicYear",
                "registrationType",
                "approvalStatus",
                "lateRegistration",
            ],
        )?;
        Ok(RegistrationQuery {
            semester: id_field(obj, "semester")?,
            academic_year: id_field(obj, "academicYear")?,
            registration_type: str_field(obj, "registrationType")?,
            approval: choice_field(obj, "approvalStatus", Approval::parse, "approved, pending")?,
            lateness: choice_field(obj, "lateRegistration", Lateness::parse, "late, ontime")?,
        })
    }
}

impl Query<Registration> for RegistrationQuery {
    fn predicates<'a>(&'a self, _snapshot: &'a Snapshot) -> Vec<Predicate<'a, Registration>> {
        let mut out: Vec<Predicate<'a, Registration>> = Vec::new();
        if let Some(sem) = self.semester {
            out.push(Box::new(move |r| r.semester == Some(sem)));
        }
        if let Some(year) = self.academic_year {
            out.push(Box::new(move |r| r.academic_year == Some(year)));
        }
        if let Some(kind) = self.registration_type.as_deref() {
            out.push(Box::new(move |r| r.registration_type == kind));
        }
        if let Some(approval) = self.approval {
            out.push(Box::new(move |r| approval.matches(r.is_approved)));
        }
        if let Some(lateness) = self.lateness {
            out.push(Box::new(move |r| {
                r.is_late_registration == (lateness == Lateness::Late)
            }));
        }
        out
    }
}

/// Department filter on slips: an id, or a name matched loosely against the
/// student's department name.
#[derive(Debug, Clone, PartialEq)]
pub enum DepartmentMatch {
    Id(EntityId),
    Name(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseSlipQuery {
    pub department: Option<DepartmentMatch>,
    pub semester: Option<EntityId>,
    pub academic_year: Option<EntityId>,
    pub student: Option<String>,
    pub status: Option<Approval>,
}

impl CourseSlipQuery {
    pub fn parse(raw: Option<&Value>) -> Result<Self, QueryError> {
        let obj = fields(
            raw,
            &["department", "semester", "academicYear", "student", "status"],
        )?;
        let department = match obj.and_then(|o| o.get("department")) {
            Some(v) if !is_unset(v) => match ref_id(Some(v)) {
                Some(id) => Some(DepartmentMatch::Id(id)),
                None => str_field(obj, "department")?
                    .map(|s| DepartmentMatch::Name(s.to_lowercase())),
            },
            _ => None,
        };
        Ok(CourseSlipQuery {
            department,
            semester: id_field(obj, "semester")?,
            academic_year: id_field(obj, "academicYear")?,
            student: str_field(obj, "student")?.map(|s| s.to_lowercase()),
            status: choice_field(obj, "status", Approval::parse, "approved, pending")?,
        })
    }
}

impl Query<CourseSlip> for CourseSlipQuery {
    fn predicates<'a>(&'a self, snapshot: &'a Snapshot) -> Vec<Predicate<'a, CourseSlip>> {
        let owner = move |slip: &CourseSlip| slip.student.and_then(|id| snapshot.student(id));
        let mut out: Vec<Predicate<'a, CourseSlip>> = Vec::new();
        match &self.department {
            Some(DepartmentMatch::Id(dept)) => {
                let dept = *dept;
                out.push(Box::new(move |slip| {
                    owner(slip).is_some_and(|s| s.department == Some(dept))
                }));
            }
            Some(DepartmentMatch::Name(wanted)) => {
                out.push(Box::new(move |slip| {
                    owner(slip)
                        .and_then(|s| s.department_name.as_deref())
                        .map(|n| n.to_lowercase())
                        .is_some_and(|n| n.contains(wanted.as_str()) || wanted.contains(n.as_str()))
                }));
            }
            None => {}
        }
        if let Some(sem) = self.semester {
            out.push(Box::new(move |slip| slip.semester == Some(sem)));
        }
        if let Some(year) = self.academic_year {
            out.push(Box::new(move |slip| slip.academic_year == Some(year)));
        }
        if let Some(term) = self.student.as_deref() {
            out.push(Box::new(move |slip| {
                owner(slip).is_some_and(|s| {
                    s.full_name().to_lowercase().contains(term)
                        || s.student_number.to_lowercase().contains(term)
                })
            }));
        }
        if let Some(status) = self.status {
            out.push(Box::new(move |slip| status.matches(slip.is_approved)));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcademicRecordQuery {
    pub department: Option<EntityId>,
    pub year: Option<i64>,
}

impl AcademicRecordQuery {
    pub fn parse(raw: Option<&Value>) -> Result<Self, QueryError> {
        let obj = fields(raw, &["department", "year"])?;
        Ok(AcademicRecordQuery {
            department: id_field(obj, "department")?,
            year: id_field(obj, "year")?,
        })
    }
}

impl Query<AcademicRecord> for AcademicRecordQuery {
    fn predicates<'a>(&'a self, _snapshot: &'a Snapshot) -> Vec<Predicate<'a, AcademicRecord>> {
        let mut out: Vec<Predicate<'a, AcademicRecord>> = Vec::new();
        if let Some(dept) = self.department {
            out.push(Box::new(move |r| r.department_id == Some(dept)));
        }
        if let Some(year) = self.year {
            out.push(Box::new(move |r| r.year == Some(year)));
        }
        out
    }
}
