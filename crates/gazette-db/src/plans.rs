//! Plan-change request repository implementation.
//!
//! Each user has at most one request row. Submitting again resets the row
//! to pending; every admin decision appends an entry to the JSONB changelog
//! so the decision history is never lost, and a decision can be corrected
//! by deciding again.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use gazette_core::{
    ChangePlanRequest, Error, PlanRequestRepository, PlanRequestStatus, Result, UserPlan,
};

/// PostgreSQL implementation of PlanRequestRepository.
pub struct PgPlanRequestRepository {
    pool: Pool<Postgres>,
}

impl PgPlanRequestRepository {
    /// Create a new PgPlanRequestRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn plan_to_str(plan: UserPlan) -> &'static str {
        match plan {
            UserPlan::Guest => "guest",
            UserPlan::AuthUser => "auth-user",
            UserPlan::Educational => "educational",
            UserPlan::Researcher => "researcher",
        }
    }

    fn str_to_plan(s: &str) -> UserPlan {
        match s {
            "guest" => UserPlan::Guest,
            "educational" => UserPlan::Educational,
            "researcher" => UserPlan::Researcher,
            _ => UserPlan::AuthUser, // fallback
        }
    }

    fn status_to_str(status: PlanRequestStatus) -> &'static str {
        match status {
            PlanRequestStatus::Pending => "pending",
            PlanRequestStatus::Approved => "approved",
            PlanRequestStatus::Rejected => "rejected",
        }
    }

    fn str_to_status(s: &str) -> PlanRequestStatus {
        match s {
            "approved" => PlanRequestStatus::Approved,
            "rejected" => PlanRequestStatus::Rejected,
            _ => PlanRequestStatus::Pending, // fallback
        }
    }

    fn parse_request_row(row: sqlx::postgres::PgRow) -> ChangePlanRequest {
        ChangePlanRequest {
            id: row.get("id"),
            user_id: row.get("user_id"),
            plan: Self::str_to_plan(row.get("plan")),
            status: Self::str_to_status(row.get("status")),
            changelog: row.get("changelog"),
            notes: row.get("notes"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    const REQUEST_COLUMNS: &'static str =
        "id, user_id, plan, status, changelog, notes, created_at, updated_at";
}

#[async_trait]
impl PlanRequestRepository for PgPlanRequestRepository {
    async fn submit(&self, user_id: Uuid, plan: UserPlan) -> Result<ChangePlanRequest> {
        let now = Utc::now();
        let plan_str = Self::plan_to_str(plan);

        let row = sqlx::query(&format!(
            "INSERT INTO change_plan_request (id, user_id, plan, status, changelog, notes, created_at, updated_at)
             VALUES ($1, $2, $3, 'pending', '[]'::jsonb, NULL, $4, $4)
             ON CONFLICT (user_id) DO UPDATE
             SET plan = EXCLUDED.plan,
                 status = 'pending',
                 notes = NULL,
                 updated_at = EXCLUDED.updated_at
             RETURNING {}",
            Self::REQUEST_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(plan_str)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_request_row(row))
    }

    async fn fetch_for_user(&self, user_id: Uuid) -> Result<Option<ChangePlanRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM change_plan_request WHERE user_id = $1",
            Self::REQUEST_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_request_row))
    }

    async fn decide(
        &self,
        user_id: Uuid,
        status: PlanRequestStatus,
        notes: Option<&str>,
    ) -> Result<ChangePlanRequest> {
        if status == PlanRequestStatus::Pending {
            return Err(Error::InvalidInput(
                "a decision must be approved or rejected".to_string(),
            ));
        }

        let now = Utc::now();
        let status_str = Self::status_to_str(status);

        let row = sqlx::query(&format!(
            "UPDATE change_plan_request
             SET status = $2,
                 notes = $3,
                 changelog = changelog || jsonb_build_array(jsonb_build_object(
                     'status', $2::text, 'plan', plan, 'date', $4::timestamptz, 'notes', $3::text
                 )),
                 updated_at = $4
             WHERE user_id = $1
             RETURNING {}",
            Self::REQUEST_COLUMNS
        ))
        .bind(user_id)
        .bind(status_str)
        .bind(notes)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_request_row)
            .ok_or_else(|| Error::EntityMissing(format!("plan request of user {user_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_round_trip() {
        for plan in [
            UserPlan::Guest,
            UserPlan::AuthUser,
            UserPlan::Educational,
            UserPlan::Researcher,
        ] {
            let s = PgPlanRequestRepository::plan_to_str(plan);
            assert_eq!(PgPlanRequestRepository::str_to_plan(s), plan);
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            PlanRequestStatus::Pending,
            PlanRequestStatus::Approved,
            PlanRequestStatus::Rejected,
        ] {
            let s = PgPlanRequestRepository::status_to_str(status);
            assert_eq!(PgPlanRequestRepository::str_to_status(s), status);
        }
    }
}
