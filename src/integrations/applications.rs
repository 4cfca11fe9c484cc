//! 申请服务协作方：查找 / 新建申请、预审资格评分
//!
//! 真实部署中由外部贷款系统提供；`InMemoryApplicationService` 用于演示与测试。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 申请摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub application_id: String,
    pub business_name: String,
    pub owner_name: String,
    pub email: String,
    pub status: String,
}

/// 新建申请所需信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationDraft {
    pub business_name: String,
    pub owner_name: String,
    pub email: String,
}

/// 查找条件：申请号优先，其次邮箱
#[derive(Debug, Clone, Default)]
pub struct ApplicationQuery {
    pub application_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityInput {
    pub requested_amount: f64,
    pub years_in_business: Option<f64>,
    pub credit_score: Option<u32>,
    pub annual_revenue: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityScore {
    pub eligible: bool,
    /// 0..=100
    pub score: u8,
    pub reasons: Vec<String>,
}

#[async_trait]
pub trait ApplicationService: Send + Sync {
    async fn lookup(&self, query: &ApplicationQuery) -> Result<Option<ApplicationSummary>, String>;

    async fn create(&self, draft: &ApplicationDraft) -> Result<ApplicationSummary, String>;

    async fn score_eligibility(&self, input: &EligibilityInput) -> Result<EligibilityScore, String>;
}

/// 内存申请服务
#[derive(Debug, Default)]
pub struct InMemoryApplicationService {
    applications: RwLock<HashMap<String, ApplicationSummary>>,
}

impl InMemoryApplicationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一条申请（测试 / 演示用）
    pub async fn insert(&self, summary: ApplicationSummary) {
        self.applications
            .write()
            .await
            .insert(summary.application_id.clone(), summary);
    }
}

#[async_trait]
impl ApplicationService for InMemoryApplicationService {
    async fn lookup(&self, query: &ApplicationQuery) -> Result<Option<ApplicationSummary>, String> {
        let apps = self.applications.read().await;
        if let Some(id) = &query.application_id {
            return Ok(apps.get(id).cloned());
        }
        if let Some(email) = &query.email {
            return Ok(apps
                .values()
                .find(|a| a.email.eq_ignore_ascii_case(email))
                .cloned());
        }
        Err("lookup needs an application_id or an email".to_string())
    }

    async fn create(&self, draft: &ApplicationDraft) -> Result<ApplicationSummary, String> {
        if draft.business_name.trim().is_empty() || draft.email.trim().is_empty() {
            return Err("business_name and email are required".to_string());
        }
        let id = format!("APP-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let summary = ApplicationSummary {
            application_id: id.clone(),
            business_name: draft.business_name.trim().to_string(),
            owner_name: draft.owner_name.trim().to_string(),
            email: draft.email.trim().to_string(),
            status: "draft".to_string(),
        };
        self.applications.write().await.insert(id, summary.clone());
        tracing::info!(application_id = %summary.application_id, "application created");
        Ok(summary)
    }

    async fn score_eligibility(&self, input: &EligibilityInput) -> Result<EligibilityScore, String> {
        if input.requested_amount <= 0.0 {
            return Err("requested_amount must be positive".to_string());
        }

        let mut score: i32 = 50;
        let mut reasons = Vec::new();

        match input.credit_score {
            Some(c) if c >= 680 => score += 20,
            Some(c) => {
                score -= 20;
                reasons.push(format!("credit score {c} is below 680"));
            }
            None => reasons.push("credit score not provided".to_string()),
        }
        match input.years_in_business {
            Some(y) if y >= 2.0 => score += 15,
            Some(_) => {
                score -= 15;
                reasons.push("less than two years in business".to_string());
            }
            None => reasons.push("time in business not provided".to_string()),
        }
        if let Some(revenue) = input.annual_revenue {
            // 年营收至少覆盖申请金额的一半
            if revenue * 2.0 >= input.requested_amount {
                score += 15;
            } else {
                score -= 10;
                reasons.push("requested amount is high relative to revenue".to_string());
            }
        }
        if input.requested_amount > 5_000_000.0 {
            score -= 30;
            reasons.push("requested amount exceeds the 7(a) limit of $5,000,000".to_string());
        }

        let score = score.clamp(0, 100) as u8;
        Ok(EligibilityScore {
            eligible: score >= 70,
            score,
            reasons,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_lookup_by_email() {
        let svc = InMemoryApplicationService::new();
        let created = svc
            .create(&ApplicationDraft {
                business_name: "Acme Bakery".into(),
                owner_name: "Ada Lovelace".into(),
                email: "ada@acme.test".into(),
            })
            .await
            .unwrap();
        assert!(created.application_id.starts_with("APP-"));

        let found = svc
            .lookup(&ApplicationQuery {
                application_id: None,
                email: Some("ADA@acme.test".into()),
            })
            .await
            .unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn test_lookup_requires_a_key() {
        let svc = InMemoryApplicationService::new();
        assert!(svc.lookup(&ApplicationQuery::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_scoring() {
        let svc = InMemoryApplicationService::new();
        let strong = svc
            .score_eligibility(&EligibilityInput {
                requested_amount: 150_000.0,
                years_in_business: Some(5.0),
                credit_score: Some(720),
                annual_revenue: Some(900_000.0),
            })
            .await
            .unwrap();
        assert!(strong.eligible);
        assert_eq!(strong.score, 100);
        assert!(strong.reasons.is_empty());

        let weak = svc
            .score_eligibility(&EligibilityInput {
                requested_amount: 150_000.0,
                years_in_business: Some(1.0),
                credit_score: Some(600),
                annual_revenue: None,
            })
            .await
            .unwrap();
        assert!(!weak.eligible);
        assert_eq!(weak.reasons.len(), 2);
    }
}
