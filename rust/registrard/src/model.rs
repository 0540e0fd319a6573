use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

pub type EntityId = i64;

/// Reads a foreign key that may arrive as a bare integer, a numeric string,
/// or an embedded object carrying `id`.
pub fn ref_id(v: Option<&Value>) -> Option<EntityId> {
    match v? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Object(obj) => ref_id(obj.get("id")),
        _ => None,
    }
}

pub fn ref_ids(v: Option<&Value>) -> Vec<EntityId> {
    v.and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|it| ref_id(Some(it))).collect())
        .unwrap_or_default()
}

/// Decimal fields come back from the backend as numbers or as strings ("3.75").
pub fn number(v: Option<&Value>) -> Option<f64> {
    let n = match v? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

pub fn int(v: Option<&Value>) -> Option<i64> {
    let n = number(v)?;
    (n.fract() == 0.0).then_some(n as i64)
}

pub fn text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn flag(v: Option<&Value>) -> Option<bool> {
    match v? {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` and anything with that prefix (datetimes).
pub fn date(v: Option<&Value>) -> Option<NaiveDate> {
    let s = v?.as_str()?.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn embedded_name(v: Option<&Value>) -> Option<String> {
    v?.as_object().and_then(|obj| text(obj.get("name")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Students,
    Courses,
    Grades,
    Semesters,
    AcademicYears,
    Registrations,
    CourseSlips,
    Departments,
}

impl Collection {
    pub const ALL: [Collection; 8] = [
        Collection::Students,
        Collection::Courses,
        Collection::Grades,
        Collection::Semesters,
        Collection::AcademicYears,
        Collection::Registrations,
        Collection::CourseSlips,
        Collection::Departments,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Collection::Students => "students",
            Collection::Courses => "courses",
            Collection::Grades => "grades",
            Collection::Semesters => "semesters",
            Collection::AcademicYears => "academic_years",
            Collection::Registrations => "registrations",
            Collection::CourseSlips => "course_slips",
            Collection::Departments => "departments",
        }
    }

    /// Backend resource names, with the camelCase spellings the UI uses as aliases.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "academicYears" => Some(Collection::AcademicYears),
            "courseSlips" => Some(Collection::CourseSlips),
            _ => Self::ALL.into_iter().find(|c| c.key() == key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: EntityId,
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub department: Option<EntityId>,
    pub department_name: Option<String>,
    pub academic_program: Option<EntityId>,
    pub year: Option<i64>,
    pub is_active: bool,
    pub cumulative_gpa: Option<f64>,
    pub user: Option<EntityId>,
}

impl Student {
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(Student {
            id: ref_id(v.get("id"))?,
            student_number: text(v.get("student_id")).unwrap_or_default(),
            first_name: text(v.get("first_name")).unwrap_or_default(),
            last_name: text(v.get("last_name")).unwrap_or_default(),
            department: ref_id(v.get("department")),
            department_name: text(v.get("department_name"))
                .or_else(|| embedded_name(v.get("department"))),
            academic_program: ref_id(v.get("academic_program")),
            year: int(v.get("year")),
            is_active: flag(v.get("is_active")).unwrap_or(true),
            cumulative_gpa: number(v.get("cumulative_gpa")),
            user: ref_id(v.get("user")),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// "First Last (S001)", the identity used in progress and failure reports.
    pub fn label(&self) -> String {
        format!("{} ({})", self.full_name(), self.student_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: EntityId,
    pub code: String,
    pub name: String,
    pub credits: i64,
    pub department: Option<EntityId>,
    pub department_name: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub instructor: Option<EntityId>,
    pub is_active: bool,
}

impl Course {
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(Course {
            id: ref_id(v.get("id"))?,
            code: text(v.get("code")).unwrap_or_else(|| "N/A".to_string()),
            name: text(v.get("name")).unwrap_or_else(|| "Unknown Course".to_string()),
            credits: int(v.get("credits")).unwrap_or(0).max(0),
            department: ref_id(v.get("department")),
            department_name: text(v.get("department_name"))
                .or_else(|| embedded_name(v.get("department"))),
            year: int(v.get("year")),
            semester: int(v.get("semester")),
            instructor: ref_id(v.get("instructor")),
            is_active: flag(v.get("is_active")).unwrap_or(true),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: EntityId,
    pub student: Option<EntityId>,
    pub course: Option<EntityId>,
    pub semester: Option<EntityId>,
    pub letter: Option<String>,
    pub grade_point: Option<f64>,
    /// `None` when the backend omitted the flag; the two GPA rules treat that differently.
    pub is_published: Option<bool>,
    pub entered_by: Option<EntityId>,
    pub course_credits: Option<f64>,
}

impl Grade {
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(Grade {
            id: ref_id(v.get("id"))?,
            student: ref_id(v.get("student")),
            course: ref_id(v.get("course")),
            semester: ref_id(v.get("semester")),
            letter: text(v.get("grade")),
            grade_point: number(v.get("grade_point")).or_else(|| number(v.get("points"))),
            is_published: flag(v.get("is_published")),
            entered_by: ref_id(v.get("entered_by")),
            course_credits: number(v.get("course_credits")),
        })
    }

    pub fn published(&self) -> bool {
        self.is_published == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSlip {
    pub id: EntityId,
    pub student: Option<EntityId>,
    pub semester: Option<EntityId>,
    pub academic_year: Option<EntityId>,
    pub courses: Vec<EntityId>,
    pub is_approved: bool,
    pub assigned_by: Option<EntityId>,
    pub assigned_date: Option<String>,
}

impl CourseSlip {
    pub fn from_json(v: &Value) -> Option<Self> {
        let mut courses = ref_ids(v.get("courses"));
        if courses.is_empty() {
            courses = ref_ids(v.get("course_details"));
        }
        Some(CourseSlip {
            id: ref_id(v.get("id"))?,
            student: ref_id(v.get("student")).or_else(|| ref_id(v.get("student_id"))),
            semester: ref_id(v.get("semester")).or_else(|| ref_id(v.get("semester_id"))),
            academic_year: ref_id(v.get("academic_year"))
                .or_else(|| ref_id(v.get("academic_year_id"))),
            courses,
            is_approved: flag(v.get("is_approved")).unwrap_or(false),
            assigned_by: ref_id(v.get("assigned_by")),
            assigned_date: text(v.get("assigned_date")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    pub id: EntityId,
    pub name: String,
    pub academic_year: Option<EntityId>,
    pub semester_number: Option<i64>,
    pub is_active: bool,
    pub registration_open: bool,
}

impl Semester {
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(Semester {
            id: ref_id(v.get("id"))?,
            name: text(v.get("name")).unwrap_or_default(),
            academic_year: ref_id(v.get("academic_year")),
            semester_number: int(v.get("semester_number")),
            is_active: flag(v.get("is_active")).unwrap_or(false),
            registration_open: flag(v.get("registration_open")).unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: EntityId,
    pub name: String,
    pub registration_start: Option<NaiveDate>,
    pub registration_deadline: Option<NaiveDate>,
    pub late_registration_deadline: Option<NaiveDate>,
    pub is_active: bool,
}

impl AcademicYear {
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(AcademicYear {
            id: ref_id(v.get("id"))?,
            name: text(v.get("name")).unwrap_or_default(),
            registration_start: date(v.get("registration_start")),
            registration_deadline: date(v.get("registration_deadline")),
            late_registration_deadline: date(v.get("late_registration_deadline")),
            is_active: flag(v.get("is_active")).unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: EntityId,
    pub student: Option<EntityId>,
    pub student_number: Option<String>,
    pub semester: Option<EntityId>,
    pub academic_year: Option<EntityId>,
    pub courses: Vec<EntityId>,
    pub is_approved: bool,
    pub is_late_registration: bool,
    pub penalty_amount: f64,
    pub penalty_paid: bool,
    pub registration_type: String,
}

impl Registration {
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(Registration {
            id: ref_id(v.get("id"))?,
            student: ref_id(v.get("student")),
            student_number: text(v.get("student_id")),
            semester: ref_id(v.get("semester")),
            academic_year: ref_id(v.get("academic_year")),
            courses: ref_ids(v.get("courses")),
            is_approved: flag(v.get("is_approved")).unwrap_or(false),
            is_late_registration: flag(v.get("is_late_registration")).unwrap_or(false),
            penalty_amount: number(v.get("penalty_amount")).unwrap_or(0.0),
            penalty_paid: flag(v.get("penalty_paid")).unwrap_or(false),
            registration_type: text(v.get("registration_type"))
                .unwrap_or_else(|| "student".to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: EntityId,
    pub name: String,
    pub code: Option<String>,
}

impl Department {
    pub fn from_json(v: &Value) -> Option<Self> {
        let id = ref_id(v.get("id"))?;
        Some(Department {
            id,
            name: text(v.get("name")).unwrap_or_else(|| format!("Department {}", id)),
            code: text(v.get("code")),
        })
    }
}

/// Typed view over the stored collections. Source order is preserved; the
/// planner relies on it for tie-breaking.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub students: Vec<Student>,
    pub courses: Vec<Course>,
    pub grades: Vec<Grade>,
    pub semesters: Vec<Semester>,
    pub academic_years: Vec<AcademicYear>,
    pub registrations: Vec<Registration>,
    pub course_slips: Vec<CourseSlip>,
    pub departments: Vec<Department>,
}

impl Snapshot {
    pub fn absorb(&mut self, collection: Collection, items: &[Value]) {
        fn parse<T>(items: &[Value], f: fn(&Value) -> Option<T>) -> Vec<T> {
            items.iter().filter_map(f).collect()
        }
        match collection {
            Collection::Students => self.students = parse(items, Student::from_json),
            Collection::Courses => self.courses = parse(items, Course::from_json),
            Collection::Grades => self.grades = parse(items, Grade::from_json),
            Collection::Semesters => self.semesters = parse(items, Semester::from_json),
            Collection::AcademicYears => {
                self.academic_years = parse(items, AcademicYear::from_json)
            }
            Collection::Registrations => {
                self.registrations = parse(items, Registration::from_json)
            }
            Collection::CourseSlips => self.course_slips = parse(items, CourseSlip::from_json),
            Collection::Departments => self.departments = parse(items, Department::from_json),
        }
    }

    pub fn student(&self, id: EntityId) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn course(&self, id: EntityId) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == id)
    }

    pub fn semester(&self, id: EntityId) -> Option<&Semester> {
        self.semesters.iter().find(|s| s.id == id)
    }

    pub fn academic_year(&self, id: EntityId) -> Option<&AcademicYear> {
        self.academic_years.iter().find(|y| y.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_keys_accept_backend_and_camel_case_names() {
        assert_eq!(Collection::from_key("course_slips"), Some(Collection::CourseSlips));
        assert_eq!(Collection::from_key("courseSlips"), Some(Collection::CourseSlips));
        assert_eq!(Collection::from_key("academic_years"), Some(Collection::AcademicYears));
        assert_eq!(Collection::from_key("academicYears"), Some(Collection::AcademicYears));
        assert_eq!(Collection::from_key("instructors"), None);
        for c in Collection::ALL {
            assert_eq!(Collection::from_key(c.key()), Some(c));
        }
    }

    #[test]
    fn ref_id_accepts_bare_string_and_embedded_forms() {
        assert_eq!(ref_id(Some(&json!(10))), Some(10));
        assert_eq!(ref_id(Some(&json!("10"))), Some(10));
        assert_eq!(ref_id(Some(&json!({ "id": 10, "name": "CS" }))), Some(10));
        assert_eq!(ref_id(Some(&json!({ "id": "10" }))), Some(10));
        assert_eq!(ref_id(Some(&json!(null))), None);
        assert_eq!(ref_id(Some(&json!("S-001"))), None);
        assert_eq!(ref_id(None), None);
    }

    #[test]
    fn decimal_strings_are_read_as_numbers() {
        let g = Grade::from_json(&json!({
            "id": 1,
            "student": { "id": 3 },
            "course": "5",
            "grade": "B+",
            "points": "3.50",
            "is_published": true
        }))
        .expect("grade");
        assert_eq!(g.student, Some(3));
        assert_eq!(g.course, Some(5));
        assert_eq!(g.grade_point, Some(3.5));
        assert!(g.published());
    }

    #[test]
    fn student_department_name_falls_back_to_embedded_object() {
        let s = Student::from_json(&json!({
            "id": 1,
            "student_id": "S001",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "department": { "id": 10, "name": "Computing" },
            "year": 2
        }))
        .expect("student");
        assert_eq!(s.department, Some(10));
        assert_eq!(s.department_name.as_deref(), Some("Computing"));
        assert_eq!(s.label(), "Ada Lovelace (S001)");
    }

    #[test]
    fn items_without_id_are_dropped() {
        let mut snap = Snapshot::default();
        snap.absorb(
            Collection::Courses,
            &[json!({ "id": 1, "code": "CS101" }), json!({ "code": "ORPHAN" })],
        );
        assert_eq!(snap.courses.len(), 1);
        assert_eq!(snap.courses[0].code, "CS101");
    }

    #[test]
    fn course_slip_reads_nested_and_fallback_keys() {
        let nested = CourseSlip::from_json(&json!({
            "id": 1,
            "student": { "id": 4 },
            "semester": { "id": 7 },
            "courses": [1, { "id": 2 }]
        }))
        .expect("slip");
        assert_eq!(nested.student, Some(4));
        assert_eq!(nested.semester, Some(7));
        assert_eq!(nested.courses, vec![1, 2]);

        let flat = CourseSlip::from_json(&json!({
            "id": 2,
            "student_id": 4,
            "semester_id": "7"
        }))
        .expect("slip");
        assert_eq!(flat.student, Some(4));
        assert_eq!(flat.semester, Some(7));
    }
}
