use crate::calc::LetterGrade;
use crate::db;
use crate::gateway::{
    CourseSlipGateway, CreateCourseSlip, GatewayError, GatewayReply, GradeGateway, GradeWrite,
};
use crate::model::{Collection, Course, CourseSlip, EntityId, Grade, Registration, Semester, Student};
use crate::session::{Role, Session};
use rusqlite::Connection;
use serde_json::json;

/// Gateway backed by the workspace: each accepted mutation is validated the
/// way the backend validates it, queued in the outbox for the host to
/// replay, and applied to the local snapshot.
pub struct StagingGateway<'a> {
    conn: &'a Connection,
    session: Option<&'a Session>,
}

fn storage(e: anyhow::Error) -> GatewayError {
    GatewayError::Transport(format!("{e:#}"))
}

impl<'a> StagingGateway<'a> {
    pub fn new(conn: &'a Connection, session: Option<&'a Session>) -> Self {
        StagingGateway { conn, session }
    }

    fn session(&self) -> Result<&'a Session, GatewayError> {
        self.session.ok_or_else(|| {
            GatewayError::Authentication("Authentication credentials were not provided.".to_string())
        })
    }

    fn require_staff(&self) -> Result<&'a Session, GatewayError> {
        let session = self.session()?;
        if !session.role.is_registrar_staff() {
            return Err(GatewayError::PermissionDenied(format!(
                "Only registrar or administrator can perform this action. Your role: {}",
                session.role.as_str()
            )));
        }
        Ok(session)
    }

    fn load<T>(
        &self,
        collection: Collection,
        id: EntityId,
        parse: fn(&serde_json::Value) -> Option<T>,
    ) -> Result<Option<T>, GatewayError> {
        Ok(db::load_item(self.conn, collection, id)
            .map_err(storage)?
            .as_ref()
            .and_then(parse))
    }

    fn require_grade_author(&self, course_id: EntityId) -> Result<&'a Session, GatewayError> {
        let session = self.session()?;
        match session.role {
            Role::Registrar | Role::Administrator => Ok(session),
            Role::Instructor => {
                let course = self.load(Collection::Courses, course_id, Course::from_json)?;
                if session.teaches(course.as_slice(), course_id) {
                    Ok(session)
                } else {
                    Err(GatewayError::PermissionDenied(
                        "You can only enter grades for courses you teach".to_string(),
                    ))
                }
            }
            other => Err(GatewayError::PermissionDenied(format!(
                "Role {} cannot enter grades",
                other.as_str()
            ))),
        }
    }

    fn stage<F>(&self, kind: &str, request: serde_json::Value, apply: F) -> Result<(), GatewayError>
    where
        F: FnOnce(&Connection) -> anyhow::Result<()>,
    {
        let tx = self.conn.unchecked_transaction().map_err(|e| storage(e.into()))?;
        apply(&*tx).map_err(storage)?;
        db::outbox_push(&tx, kind, &request).map_err(storage)?;
        tx.commit().map_err(|e| storage(e.into()))?;
        tracing::debug!(kind, "staged mutation");
        Ok(())
    }

    pub fn approve_course_slip(&mut self, slip_id: EntityId) -> Result<GatewayReply, GatewayError> {
        self.require_staff()?;
        if self
            .load(Collection::CourseSlips, slip_id, CourseSlip::from_json)?
            .is_none()
        {
            return Err(GatewayError::rejected(404, "Course slip not found"));
        }
        self.stage(
            "courseSlip.approve",
            json!({
                "method": "POST",
                "path": format!("/course-slips/{}/approve/", slip_id),
                "body": {},
            }),
            |conn| {
                db::update_item(conn, Collection::CourseSlips, slip_id, |item| {
                    item["is_approved"] = json!(true);
                })?;
                Ok(())
            },
        )?;
        Ok(GatewayReply::done("Course slip approved"))
    }

    pub fn approve_registration(&mut self, registration_id: EntityId) -> Result<GatewayReply, GatewayError> {
        self.require_staff()?;
        let Some(registration) =
            self.load(Collection::Registrations, registration_id, Registration::from_json)?
        else {
            return Err(GatewayError::rejected(404, "Registration not found"));
        };
        if registration.is_approved {
            return Err(GatewayError::rejected(400, "Registration is already approved"));
        }
        self.stage(
            "registration.approve",
            json!({
                "method": "POST",
                "path": format!("/registrations/{}/approve_registration/", registration_id),
                "body": {},
            }),
            |conn| {
                db::update_item(conn, Collection::Registrations, registration_id, |item| {
                    item["is_approved"] = json!(true);
                })?;
                Ok(())
            },
        )?;
        Ok(GatewayReply::done("Registration approved"))
    }
}

impl CourseSlipGateway for StagingGateway<'_> {
    fn create_course_slip(&mut self, req: &CreateCourseSlip) -> Result<GatewayReply, GatewayError> {
        let session = self.require_staff()?;
        if req.course_ids.is_empty() {
            return Err(GatewayError::rejected(
                400,
                "Student ID, Semester ID, and Course IDs are required",
            ));
        }
        let Some(student) = self.load(Collection::Students, req.student_id, Student::from_json)? else {
            return Err(GatewayError::rejected(404, "Student not found"));
        };
        let Some(semester) = self.load(Collection::Semesters, req.semester_id, Semester::from_json)?
        else {
            return Err(GatewayError::rejected(404, "Semester not found"));
        };

        let mut courses = Vec::new();
        for id in &req.course_ids {
            if let Some(c) = self.load(Collection::Courses, *id, Course::from_json)? {
                courses.push(c);
            }
        }
        let invalid: Vec<String> = courses
            .iter()
            .filter_map(|c| {
                if c.department != student.department {
                    Some(format!("{} - Wrong department", c.code))
                } else if c.year != student.year {
                    Some(format!("{} - Wrong academic year", c.code))
                } else {
                    None
                }
            })
            .collect();
        if !invalid.is_empty() {
            return Err(GatewayError::Rejected {
                status: 400,
                message: "Invalid courses selected".to_string(),
                details: Some(json!({ "invalid_courses": invalid })),
            });
        }

        let existing = db::load_collection(self.conn, Collection::CourseSlips).map_err(storage)?;
        let duplicate = existing
            .iter()
            .filter_map(CourseSlip::from_json)
            .any(|s| s.student == Some(student.id) && s.semester == Some(semester.id));
        if duplicate {
            return Err(GatewayError::rejected(
                400,
                "Course slip already exists for this student and semester",
            ));
        }

        let slip_id = db::next_item_id(self.conn, Collection::CourseSlips).map_err(storage)?;
        let slip = json!({
            "id": slip_id,
            "student": student.id,
            "semester": semester.id,
            "academic_year": semester.academic_year,
            "courses": courses.iter().map(|c| c.id).collect::<Vec<_>>(),
            "is_approved": true,
            "assigned_by": session.user_id,
            "assigned_date": chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string(),
        });
        self.stage(
            "courseSlip.create",
            json!({
                "method": "POST",
                "path": "/create-student-course-slip/",
                "body": req,
                "localId": slip_id,
            }),
            |conn| db::append_item(conn, Collection::CourseSlips, &slip),
        )?;
        Ok(GatewayReply::done(format!(
            "Course slip created for {}",
            student.full_name()
        )))
    }
}

fn grade_point_for(letter: &str) -> Result<Option<f64>, GatewayError> {
    LetterGrade::parse(letter)
        .map(|g| g.grade_point())
        .ok_or_else(|| GatewayError::rejected(400, format!("Invalid grade: {}", letter)))
}

impl GradeGateway for StagingGateway<'_> {
    fn create_grade(&mut self, grade: &GradeWrite) -> Result<GatewayReply, GatewayError> {
        let session = self.require_grade_author(grade.course)?;
        grade_point_for(&grade.grade)?;
        if self
            .load(Collection::Students, grade.student, Student::from_json)?
            .is_none()
        {
            return Err(GatewayError::rejected(404, "Student not found"));
        }
        let existing = db::load_collection(self.conn, Collection::Grades).map_err(storage)?;
        let duplicate = existing.iter().filter_map(Grade::from_json).any(|g| {
            g.student == Some(grade.student)
                && g.course == Some(grade.course)
                && g.semester == Some(grade.semester)
        });
        if duplicate {
            return Err(GatewayError::rejected(
                400,
                "Grade already exists for this student, course and semester",
            ));
        }

        let grade_id = db::next_item_id(self.conn, Collection::Grades).map_err(storage)?;
        let item = json!({
            "id": grade_id,
            "student": grade.student,
            "course": grade.course,
            "semester": grade.semester,
            "grade": grade.grade,
            "grade_point": grade.grade_point,
            "is_published": grade.is_published,
            "entered_by": session.user_id,
        });
        self.stage(
            "grade.create",
            json!({ "method": "POST", "path": "/grades/", "body": grade, "localId": grade_id }),
            |conn| db::append_item(conn, Collection::Grades, &item),
        )?;
        Ok(GatewayReply::done("Grade saved"))
    }

    fn update_grade(&mut self, id: EntityId, grade: &GradeWrite) -> Result<GatewayReply, GatewayError> {
        self.require_grade_author(grade.course)?;
        grade_point_for(&grade.grade)?;
        let Some(existing) = self.load(Collection::Grades, id, Grade::from_json)? else {
            return Err(GatewayError::rejected(404, "Grade not found"));
        };
        if existing.published() {
            return Err(GatewayError::rejected(400, "Published grades cannot be modified"));
        }
        self.stage(
            "grade.update",
            json!({ "method": "PUT", "path": format!("/grades/{}/", id), "body": grade }),
            |conn| {
                db::update_item(conn, Collection::Grades, id, |item| {
                    item["grade"] = json!(grade.grade);
                    item["grade_point"] = json!(grade.grade_point);
                    item["is_published"] = json!(grade.is_published);
                })?;
                Ok(())
            },
        )?;
        Ok(GatewayReply::done("Grade updated"))
    }

    fn set_grade_published(&mut self, id: EntityId, published: bool) -> Result<GatewayReply, GatewayError> {
        let Some(existing) = self.load(Collection::Grades, id, Grade::from_json)? else {
            return Err(GatewayError::rejected(404, "Grade not found"));
        };
        let course = existing
            .course
            .ok_or_else(|| GatewayError::rejected(400, "Grade has no course"))?;
        self.require_grade_author(course)?;
        self.stage(
            "grade.publish",
            json!({
                "method": "PATCH",
                "path": format!("/grades/{}/", id),
                "body": { "is_published": published },
            }),
            |conn| {
                db::update_item(conn, Collection::Grades, id, |item| {
                    item["is_published"] = json!(published);
                })?;
                Ok(())
            },
        )?;
        Ok(GatewayReply::done(if published {
            "Grade published"
        } else {
            "Grade unpublished"
        }))
    }
}
