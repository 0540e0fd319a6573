use crate::model::{ref_id, text, Course, EntityId, Grade, Snapshot, Student};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Instructor,
    DepartmentHead,
    Registrar,
    Administrator,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "student" => Some(Role::Student),
            "instructor" => Some(Role::Instructor),
            "department_head" => Some(Role::DepartmentHead),
            "registrar" => Some(Role::Registrar),
            "administrator" | "admin" => Some(Role::Administrator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::DepartmentHead => "department_head",
            Role::Registrar => "registrar",
            Role::Administrator => "administrator",
        }
    }

    pub fn is_registrar_staff(self) -> bool {
        matches!(self, Role::Registrar | Role::Administrator)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: EntityId,
    pub username: String,
    pub role: Role,
    pub department: Option<EntityId>,
    pub department_name: Option<String>,
}

impl Session {
    /// Reads the backend's login response: `{user: {id, username, ..}, role}`
    /// where `role` is either a bare string or `{role, department, department_id}`.
    pub fn from_login(v: &Value) -> Result<Self, String> {
        let user = v.get("user").ok_or("missing user")?;
        let user_id = ref_id(Some(user)).ok_or("missing user.id")?;
        let username = text(user.get("username")).unwrap_or_default();

        let role_value = v.get("role").ok_or("missing role")?;
        let (role_raw, department, department_name) = match role_value {
            Value::String(s) => (s.clone(), None, None),
            Value::Object(obj) => (
                text(obj.get("role")).ok_or("missing role.role")?,
                ref_id(obj.get("department_id")).or_else(|| match obj.get("department") {
                    Some(d @ Value::Object(_)) => ref_id(Some(d)),
                    _ => None,
                }),
                match obj.get("department") {
                    Some(Value::Object(d)) => text(d.get("name")),
                    other => text(other),
                },
            ),
            _ => return Err("role must be a string or object".to_string()),
        };
        let role = Role::parse(&role_raw).ok_or_else(|| format!("unknown role: {}", role_raw))?;

        Ok(Session {
            user_id,
            username,
            role,
            department,
            department_name,
        })
    }

    /// The student record owned by this account, if any.
    pub fn own_student<'a>(&self, students: &'a [Student]) -> Option<&'a Student> {
        students.iter().find(|s| s.user == Some(self.user_id))
    }

    fn taught_courses(&self, courses: &[Course]) -> HashSet<EntityId> {
        courses
            .iter()
            .filter(|c| c.instructor == Some(self.user_id))
            .map(|c| c.id)
            .collect()
    }

    fn department_courses(&self, courses: &[Course]) -> HashSet<EntityId> {
        courses
            .iter()
            .filter(|c| self.department.is_some() && c.department == self.department)
            .map(|c| c.id)
            .collect()
    }

    pub fn teaches(&self, courses: &[Course], course_id: EntityId) -> bool {
        courses
            .iter()
            .any(|c| c.id == course_id && c.instructor == Some(self.user_id))
    }

    /// Grades this session may read.
    pub fn visible_grades(&self, snapshot: &Snapshot) -> Vec<Grade> {
        match self.role {
            Role::Registrar | Role::Administrator => snapshot.grades.clone(),
            Role::Student => {
                let Some(me) = self.own_student(&snapshot.students) else {
                    return Vec::new();
                };
                snapshot
                    .grades
                    .iter()
                    .filter(|g| g.student == Some(me.id) && g.published())
                    .cloned()
                    .collect()
            }
            Role::Instructor => {
                let taught = self.taught_courses(&snapshot.courses);
                snapshot
                    .grades
                    .iter()
                    .filter(|g| g.course.is_some_and(|c| taught.contains(&c)))
                    .cloned()
                    .collect()
            }
            Role::DepartmentHead => {
                let owned = self.department_courses(&snapshot.courses);
                snapshot
                    .grades
                    .iter()
                    .filter(|g| g.published() && g.course.is_some_and(|c| owned.contains(&c)))
                    .cloned()
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> Snapshot {
        let mut snap = Snapshot::default();
        snap.absorb(
            crate::model::Collection::Students,
            &[
                json!({ "id": 1, "student_id": "S001", "user": 50, "department": 10 }),
                json!({ "id": 2, "student_id": "S002", "user": 51, "department": 20 }),
            ],
        );
        snap.absorb(
            crate::model::Collection::Courses,
            &[
                json!({ "id": 100, "code": "CS101", "department": 10, "instructor": 70 }),
                json!({ "id": 200, "code": "MA101", "department": 20, "instructor": 71 }),
            ],
        );
        snap.absorb(
            crate::model::Collection::Grades,
            &[
                json!({ "id": 1, "student": 1, "course": 100, "grade": "A", "grade_point": 4, "is_published": true }),
                json!({ "id": 2, "student": 1, "course": 200, "grade": "B", "grade_point": 3, "is_published": false }),
                json!({ "id": 3, "student": 2, "course": 200, "grade": "C", "grade_point": 2, "is_published": true }),
            ],
        );
        snap
    }

    #[test]
    fn login_accepts_object_and_string_roles() {
        let s = Session::from_login(&json!({
            "message": "Login successful",
            "user": { "id": 9, "username": "reg" },
            "role": { "role": "registrar", "department": null, "department_id": null }
        }))
        .expect("session");
        assert_eq!(s.role, Role::Registrar);
        assert_eq!(s.department, None);

        let h = Session::from_login(&json!({
            "user": { "id": 3 },
            "role": { "role": "department_head", "department": "Computing", "department_id": 10 }
        }))
        .expect("session");
        assert_eq!(h.role, Role::DepartmentHead);
        assert_eq!(h.department, Some(10));
        assert_eq!(h.department_name.as_deref(), Some("Computing"));

        let i = Session::from_login(&json!({ "user": { "id": 4 }, "role": "instructor" }))
            .expect("session");
        assert_eq!(i.role, Role::Instructor);

        assert!(Session::from_login(&json!({ "user": { "id": 4 }, "role": "janitor" })).is_err());
        assert!(Session::from_login(&json!({ "role": "student" })).is_err());
    }

    #[test]
    fn instructors_teach_only_their_own_courses() {
        let snap = snapshot();
        let prof = Session::from_login(&json!({ "user": { "id": 71 }, "role": "instructor" }))
            .expect("session");
        assert!(prof.teaches(&snap.courses, 200));
        assert!(!prof.teaches(&snap.courses, 100));
        assert!(!prof.teaches(&snap.courses, 999));
        assert!(!prof.teaches(&[], 200));
    }

    #[test]
    fn grade_visibility_follows_role() {
        let snap = snapshot();
        let ids = |s: &Session| -> Vec<EntityId> {
            s.visible_grades(&snap).iter().map(|g| g.id).collect()
        };
        let mk = |user_id, role, department| Session {
            user_id,
            username: String::new(),
            role,
            department,
            department_name: None,
        };

        assert_eq!(ids(&mk(50, Role::Student, None)), vec![1]);
        assert_eq!(ids(&mk(71, Role::Instructor, None)), vec![2, 3]);
        assert_eq!(ids(&mk(5, Role::DepartmentHead, Some(20))), vec![3]);
        assert_eq!(ids(&mk(5, Role::Registrar, None)), vec![1, 2, 3]);
        assert!(ids(&mk(99, Role::Student, None)).is_empty());
    }
}
