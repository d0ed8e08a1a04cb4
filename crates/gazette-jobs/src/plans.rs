//! Plan-change lifecycle service.
//!
//! Drives a user's request through pending, approved, and rejected:
//! persists the transition, mutates the plan group, emits the identity
//! event so the bitmap listener re-materializes, and sends the
//! notification mail last so an acceptance always observes the group
//! change.

use std::sync::Arc;

use gazette_core::access::{GROUP_PLAN_EDUCATIONAL, GROUP_PLAN_RESEARCHER};
use gazette_core::{
    ChangePlanRequest, Error, EventBus, IdentityEvent, Mail, Mailer, PlanRequestRepository,
    PlanRequestStatus, Result, UserPlan, UserRecord, UserRepository,
};
use uuid::Uuid;

/// The group a plan request grants or revokes.
fn plan_group(plan: UserPlan) -> Result<&'static str> {
    match plan {
        UserPlan::Researcher => Ok(GROUP_PLAN_RESEARCHER),
        UserPlan::Educational => Ok(GROUP_PLAN_EDUCATIONAL),
        other => Err(Error::InvalidInput(format!(
            "plan {other} cannot be requested"
        ))),
    }
}

fn receipt_mail(user: &UserRecord, plan: UserPlan) -> Mail {
    Mail {
        to: user.email.clone(),
        subject: format!("Your {plan} plan request was received"),
        body: format!(
            "Hello {},\n\nyour request for the {} plan is pending review. \
             You will be notified once it has been decided.",
            user.username, plan
        ),
    }
}

fn staff_mail(staff_address: &str, user: &UserRecord, plan: UserPlan) -> Mail {
    Mail {
        to: staff_address.to_string(),
        subject: format!("Plan request: {} -> {plan}", user.username),
        body: format!(
            "User {} ({}) requested the {} plan.",
            user.username, user.email, plan
        ),
    }
}

fn decision_mail(user: &UserRecord, plan: UserPlan, approved: bool) -> Mail {
    let verdict = if approved { "approved" } else { "rejected" };
    Mail {
        to: user.email.clone(),
        subject: format!("Your {plan} plan request was {verdict}"),
        body: format!(
            "Hello {},\n\nyour request for the {} plan has been {}.",
            user.username, plan, verdict
        ),
    }
}

/// Orchestrates plan-change requests and their side effects.
pub struct PlanService {
    users: Arc<dyn UserRepository>,
    requests: Arc<dyn PlanRequestRepository>,
    mailer: Arc<dyn Mailer>,
    bus: Arc<EventBus>,
    staff_address: String,
}

impl PlanService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        requests: Arc<dyn PlanRequestRepository>,
        mailer: Arc<dyn Mailer>,
        bus: Arc<EventBus>,
        staff_address: impl Into<String>,
    ) -> Self {
        Self {
            users,
            requests,
            mailer,
            bus,
            staff_address: staff_address.into(),
        }
    }

    /// Submit (or resubmit) a plan request. Sends the receipt to the user
    /// and a notice to staff.
    pub async fn submit(&self, user_id: Uuid, plan: UserPlan) -> Result<ChangePlanRequest> {
        plan_group(plan)?;
        let user = self.users.fetch(user_id).await?;
        let request = self.requests.submit(user_id, plan).await?;

        self.mailer.send(&receipt_mail(&user, plan)).await?;
        self.mailer
            .send(&staff_mail(&self.staff_address, &user, plan))
            .await?;

        tracing::info!(
            subsystem = "identity",
            user_id = %user_id,
            plan = %plan,
            "Plan request submitted"
        );
        Ok(request)
    }

    /// Approve the user's request: grant the plan group, re-materialize
    /// the bitmap, then notify.
    pub async fn approve(&self, user_id: Uuid, notes: Option<&str>) -> Result<ChangePlanRequest> {
        self.decide(user_id, PlanRequestStatus::Approved, notes).await
    }

    /// Reject the user's request (also corrects an earlier approval):
    /// revoke the plan group, re-materialize, then notify.
    pub async fn reject(&self, user_id: Uuid, notes: Option<&str>) -> Result<ChangePlanRequest> {
        self.decide(user_id, PlanRequestStatus::Rejected, notes).await
    }

    async fn decide(
        &self,
        user_id: Uuid,
        status: PlanRequestStatus,
        notes: Option<&str>,
    ) -> Result<ChangePlanRequest> {
        let user = self.users.fetch(user_id).await?;
        let request = self.requests.decide(user_id, status, notes).await?;
        let group = plan_group(request.plan)?;

        let approved = status == PlanRequestStatus::Approved;
        if approved {
            self.users.add_to_group(user_id, group).await?;
        } else {
            self.users.remove_from_group(user_id, group).await?;
        }
        self.bus.emit(IdentityEvent::GroupsChanged { user_id });

        // Mail goes out after the group mutation, so an acceptance read
        // back by the user already reflects the new plan.
        self.mailer
            .send(&decision_mail(&user, request.plan, approved))
            .await?;

        tracing::info!(
            subsystem = "identity",
            user_id = %user_id,
            plan = %request.plan,
            approved,
            "Plan request decided"
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::RecordingMailer;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use gazette_core::AccessProfile;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::Mutex;

    struct FakeUsers {
        record: UserRecord,
        groups: Mutex<HashSet<String>>,
    }

    impl FakeUsers {
        fn new(record: UserRecord) -> Self {
            Self {
                record,
                groups: Mutex::new(HashSet::new()),
            }
        }
    }

    #[async_trait]
    impl UserRepository for FakeUsers {
        async fn fetch(&self, id: Uuid) -> Result<UserRecord> {
            if id == self.record.id {
                Ok(self.record.clone())
            } else {
                Err(Error::EntityMissing(format!("user {id}")))
            }
        }

        async fn fetch_by_uid(&self, _uid: &str) -> Result<UserRecord> {
            Ok(self.record.clone())
        }

        async fn fetch_by_username(&self, _username: &str) -> Result<UserRecord> {
            Ok(self.record.clone())
        }

        async fn access_profile(&self, _id: Uuid) -> Result<AccessProfile> {
            Ok(AccessProfile {
                groups: self.groups.lock().await.iter().cloned().collect(),
                subscription_positions: vec![],
                terms_accepted: true,
            })
        }

        async fn accept_terms(&self, _id: Uuid, _at: DateTime<Utc>) -> Result<()> {
            Ok(())
        }

        async fn add_to_group(&self, _id: Uuid, group: &str) -> Result<()> {
            self.groups.lock().await.insert(group.to_string());
            Ok(())
        }

        async fn remove_from_group(&self, _id: Uuid, group: &str) -> Result<()> {
            self.groups.lock().await.remove(group);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRequests {
        rows: Mutex<HashMap<Uuid, ChangePlanRequest>>,
    }

    #[async_trait]
    impl PlanRequestRepository for FakeRequests {
        async fn submit(&self, user_id: Uuid, plan: UserPlan) -> Result<ChangePlanRequest> {
            let mut rows = self.rows.lock().await;
            let request = rows
                .entry(user_id)
                .and_modify(|r| {
                    r.plan = plan;
                    r.status = PlanRequestStatus::Pending;
                    r.notes = None;
                })
                .or_insert_with(|| ChangePlanRequest {
                    id: Uuid::new_v4(),
                    user_id,
                    plan,
                    status: PlanRequestStatus::Pending,
                    changelog: json!([]),
                    notes: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                });
            Ok(request.clone())
        }

        async fn fetch_for_user(&self, user_id: Uuid) -> Result<Option<ChangePlanRequest>> {
            Ok(self.rows.lock().await.get(&user_id).cloned())
        }

        async fn decide(
            &self,
            user_id: Uuid,
            status: PlanRequestStatus,
            notes: Option<&str>,
        ) -> Result<ChangePlanRequest> {
            let mut rows = self.rows.lock().await;
            let request = rows
                .get_mut(&user_id)
                .ok_or_else(|| Error::EntityMissing(format!("plan request of user {user_id}")))?;
            request.status = status;
            request.notes = notes.map(str::to_string);
            let entries = request.changelog.as_array_mut().unwrap();
            entries.push(json!({
                "status": match status {
                    PlanRequestStatus::Pending => "pending",
                    PlanRequestStatus::Approved => "approved",
                    PlanRequestStatus::Rejected => "rejected",
                },
                "plan": request.plan.to_string(),
                "notes": notes,
            }));
            Ok(request.clone())
        }
    }

    fn test_user() -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            username: "tester".to_string(),
            uid: "tester".to_string(),
            email: "tester@example.org".to_string(),
            is_staff: false,
            max_loops_allowed: 100,
            max_parallel_jobs: 2,
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        service: PlanService,
        users: Arc<FakeUsers>,
        requests: Arc<FakeRequests>,
        mailer: Arc<RecordingMailer>,
        user_id: Uuid,
    }

    fn fixture() -> Fixture {
        let user = test_user();
        let user_id = user.id;
        let users = Arc::new(FakeUsers::new(user));
        let requests = Arc::new(FakeRequests::default());
        let mailer = Arc::new(RecordingMailer::new());
        let service = PlanService::new(
            users.clone(),
            requests.clone(),
            mailer.clone(),
            Arc::new(EventBus::new(32)),
            "staff@example.org",
        );
        Fixture {
            service,
            users,
            requests,
            mailer,
            user_id,
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_pending_approved_rejected() {
        let f = fixture();

        // Pending: receipt to the user plus the staff notice.
        let request = f
            .service
            .submit(f.user_id, UserPlan::Researcher)
            .await
            .unwrap();
        assert_eq!(request.status, PlanRequestStatus::Pending);
        let sent = f.mailer.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "tester@example.org");
        assert_eq!(sent[1].to, "staff@example.org");

        // Approved: group granted, one acceptance mail, one log entry.
        let request = f.service.approve(f.user_id, None).await.unwrap();
        assert_eq!(request.status, PlanRequestStatus::Approved);
        assert!(f
            .users
            .groups
            .lock()
            .await
            .contains(GROUP_PLAN_RESEARCHER));
        let sent = f.mailer.sent().await;
        assert_eq!(sent.len(), 3);
        assert!(sent[2].subject.contains("approved"));
        assert_eq!(request.changelog.as_array().unwrap().len(), 1);

        // Rejected, correcting the approval: group revoked, one rejection
        // mail, a second log entry.
        let request = f
            .service
            .reject(f.user_id, Some("wrong plan"))
            .await
            .unwrap();
        assert_eq!(request.status, PlanRequestStatus::Rejected);
        assert!(!f
            .users
            .groups
            .lock()
            .await
            .contains(GROUP_PLAN_RESEARCHER));
        let sent = f.mailer.sent().await;
        assert_eq!(sent.len(), 4);
        assert!(sent[3].subject.contains("rejected"));
        assert_eq!(request.changelog.as_array().unwrap().len(), 2);
        assert_eq!(request.notes.as_deref(), Some("wrong plan"));
    }

    #[tokio::test]
    async fn test_submit_unrequestable_plan_rejected() {
        let f = fixture();
        let err = f.service.submit(f.user_id, UserPlan::Guest).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(f.mailer.sent().await.is_empty());
        assert!(f.requests.fetch_for_user(f.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decide_without_request_is_missing() {
        let f = fixture();
        let err = f.service.approve(f.user_id, None).await.unwrap_err();
        assert!(matches!(err, Error::EntityMissing(_)));
    }

    #[tokio::test]
    async fn test_decision_emits_identity_event() {
        let user = test_user();
        let user_id = user.id;
        let bus = Arc::new(EventBus::new(32));
        let mut rx = bus.subscribe();
        let service = PlanService::new(
            Arc::new(FakeUsers::new(user)),
            Arc::new(FakeRequests::default()),
            Arc::new(RecordingMailer::new()),
            bus,
            "staff@example.org",
        );

        service.submit(user_id, UserPlan::Educational).await.unwrap();
        service.approve(user_id, None).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, IdentityEvent::GroupsChanged { .. }));
        assert_eq!(event.user_id(), user_id);
    }
}
