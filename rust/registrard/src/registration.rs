use crate::model::{AcademicYear, Department, EntityId, Registration, Snapshot, Student};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_LATE_PENALTY: f64 = 500.00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Approved,
    Pending,
    NotRegistered,
}

impl RegistrationStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approved" => Some(RegistrationStatus::Approved),
            "pending" => Some(RegistrationStatus::Pending),
            "not_registered" => Some(RegistrationStatus::NotRegistered),
            _ => None,
        }
    }
}

fn belongs_to(reg: &Registration, student: &Student) -> bool {
    reg.student == Some(student.id)
        || (!student.student_number.is_empty()
            && reg.student_number.as_deref() == Some(student.student_number.as_str()))
}

pub fn registrations_of<'a>(student: &Student, registrations: &'a [Registration]) -> Vec<&'a Registration> {
    registrations
        .iter()
        .filter(|r| belongs_to(r, student))
        .collect()
}

pub fn registration_status(student: &Student, registrations: &[Registration]) -> RegistrationStatus {
    let own = registrations_of(student, registrations);
    if own.iter().any(|r| r.is_approved) {
        RegistrationStatus::Approved
    } else if !own.is_empty() {
        RegistrationStatus::Pending
    } else {
        RegistrationStatus::NotRegistered
    }
}

pub fn students_without_registration<'a>(snapshot: &'a Snapshot) -> Vec<&'a Student> {
    snapshot
        .students
        .iter()
        .filter(|s| !snapshot.registrations.iter().any(|r| belongs_to(r, s)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    NotStarted,
    Regular,
    Late,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationWindow {
    pub academic_year_id: EntityId,
    pub academic_year: String,
    pub status: WindowStatus,
    pub registration_start: Option<NaiveDate>,
    pub registration_deadline: Option<NaiveDate>,
    pub late_registration_deadline: Option<NaiveDate>,
    pub penalty_amount: Option<f64>,
}

/// Where `today` falls in the year's registration calendar. Missing dates
/// never open a period: without a start the window has not started, and a
/// missing deadline closes the period it would end.
pub fn registration_window(year: &AcademicYear, today: NaiveDate, penalty: Option<f64>) -> RegistrationWindow {
    let status = match (
        year.registration_start,
        year.registration_deadline,
        year.late_registration_deadline,
    ) {
        (None, _, _) => WindowStatus::NotStarted,
        (Some(start), _, _) if today < start => WindowStatus::NotStarted,
        (_, Some(deadline), _) if today <= deadline => WindowStatus::Regular,
        (_, _, Some(late)) if today <= late => WindowStatus::Late,
        _ => WindowStatus::Closed,
    };
    RegistrationWindow {
        academic_year_id: year.id,
        academic_year: year.name.clone(),
        status,
        registration_start: year.registration_start,
        registration_deadline: year.registration_deadline,
        late_registration_deadline: year.late_registration_deadline,
        penalty_amount: (status == WindowStatus::Late).then(|| penalty.unwrap_or(DEFAULT_LATE_PENALTY)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrarCounters {
    pub total_students: usize,
    pub total_registrations: usize,
    pub students_with_registrations: usize,
    pub pending_approvals: usize,
    pub approved_registrations: usize,
    pub late_registrations: usize,
    pub total_grades: usize,
    pub course_slips: usize,
}

pub fn registrar_counters(snapshot: &Snapshot) -> RegistrarCounters {
    let regs = &snapshot.registrations;
    RegistrarCounters {
        total_students: snapshot.students.len(),
        total_registrations: regs.len(),
        students_with_registrations: snapshot.students.len()
            - students_without_registration(snapshot).len(),
        pending_approvals: regs.iter().filter(|r| !r.is_approved).count(),
        approved_registrations: regs.iter().filter(|r| r.is_approved).count(),
        late_registrations: regs.iter().filter(|r| r.is_late_registration).count(),
        total_grades: snapshot.grades.len(),
        course_slips: snapshot.course_slips.len(),
    }
}

/// Departments known from the department list, then any referenced only by
/// students or courses. Ordered by id.
pub fn distinct_departments(snapshot: &Snapshot) -> Vec<Department> {
    let mut found: BTreeMap<EntityId, Department> = BTreeMap::new();
    for d in &snapshot.departments {
        found.entry(d.id).or_insert_with(|| d.clone());
    }
    let referenced = snapshot
        .students
        .iter()
        .map(|s| (s.department, s.department_name.as_deref()))
        .chain(
            snapshot
                .courses
                .iter()
                .map(|c| (c.department, c.department_name.as_deref())),
        );
    for (id, name) in referenced {
        let Some(id) = id else { continue };
        let entry = found.entry(id).or_insert_with(|| Department {
            id,
            name: format!("Department {}", id),
            code: None,
        });
        if entry.name == format!("Department {}", id) {
            if let Some(name) = name {
                entry.name = name.to_string();
            }
        }
    }
    found.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Collection;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn year() -> AcademicYear {
        AcademicYear::from_json(&json!({
            "id": 1,
            "name": "2024/2025",
            "registration_start": "2024-09-01",
            "registration_deadline": "2024-09-15",
            "late_registration_deadline": "2024-09-30T23:59:00Z"
        }))
        .expect("year")
    }

    #[test]
    fn window_boundaries() {
        let y = year();
        assert_eq!(registration_window(&y, d("2024-08-31"), None).status, WindowStatus::NotStarted);
        assert_eq!(registration_window(&y, d("2024-09-01"), None).status, WindowStatus::Regular);
        assert_eq!(registration_window(&y, d("2024-09-15"), None).status, WindowStatus::Regular);
        let late = registration_window(&y, d("2024-09-16"), None);
        assert_eq!(late.status, WindowStatus::Late);
        assert_eq!(late.penalty_amount, Some(500.0));
        assert_eq!(
            registration_window(&y, d("2024-09-20"), Some(250.0)).penalty_amount,
            Some(250.0)
        );
        let closed = registration_window(&y, d("2024-10-01"), None);
        assert_eq!(closed.status, WindowStatus::Closed);
        assert_eq!(closed.penalty_amount, None);
    }

    #[test]
    fn status_matches_by_id_or_student_number() {
        let mut snap = Snapshot::default();
        snap.absorb(
            Collection::Students,
            &[
                json!({ "id": 1, "student_id": "S001" }),
                json!({ "id": 2, "student_id": "S002" }),
                json!({ "id": 3, "student_id": "S003" }),
            ],
        );
        snap.absorb(
            Collection::Registrations,
            &[
                json!({ "id": 10, "student": { "id": 1 }, "is_approved": false }),
                json!({ "id": 11, "student": 1, "is_approved": true }),
                json!({ "id": 12, "student_id": "S002", "is_approved": false, "is_late_registration": true }),
            ],
        );
        let status = |i: usize| registration_status(&snap.students[i], &snap.registrations);
        assert_eq!(status(0), RegistrationStatus::Approved);
        assert_eq!(status(1), RegistrationStatus::Pending);
        assert_eq!(status(2), RegistrationStatus::NotRegistered);

        let unregistered: Vec<i64> = students_without_registration(&snap).iter().map(|s| s.id).collect();
        assert_eq!(unregistered, vec![3]);

        let c = registrar_counters(&snap);
        assert_eq!(c.students_with_registrations, 2);
        assert_eq!(c.pending_approvals, 2);
        assert_eq!(c.approved_registrations, 1);
        assert_eq!(c.late_registrations, 1);
    }

    #[test]
    fn departments_are_merged_from_all_sources() {
        let mut snap = Snapshot::default();
        snap.absorb(Collection::Departments, &[json!({ "id": 2, "name": "Maths", "code": "MA" })]);
        snap.absorb(
            Collection::Students,
            &[json!({ "id": 1, "department": { "id": 1, "name": "Computing" } })],
        );
        snap.absorb(
            Collection::Courses,
            &[json!({ "id": 1, "department": 2, "department_name": "Other" }), json!({ "id": 2, "department": 3 })],
        );
        let names: Vec<(i64, String)> = distinct_departments(&snap)
            .into_iter()
            .map(|d| (d.id, d.name))
            .collect();
        assert_eq!(
            names,
            vec![
                (1, "Computing".to_string()),
                (2, "Maths".to_string()),
                (3, "Department 3".to_string())
            ]
        );
    }
}
