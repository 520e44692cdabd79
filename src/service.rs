use chrono::{Local, NaiveDate};
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::db::StatsRepository;
use crate::error::StatsError;
use crate::models::{DatePartition, StatsDataObject, StatsType};
use crate::stats_api::{StatsApiClient, StatsQuery};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    Sent { entries: usize },
    NothingToSend,
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub stats_types: Vec<StatsType>,
    pub series_limit: usize,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            stats_types: vec![StatsType::Risk],
            series_limit: 10,
        }
    }
}

/// Builds the data points for the selected records. An empty `anr_ids`
/// selects every record.
pub async fn collect_data<R: StatsRepository>(
    repository: &R,
    anr_ids: &[i32],
    options: &CollectOptions,
    date: NaiveDate,
) -> Result<Vec<StatsDataObject>, StatsError> {
    let anrs = if anr_ids.is_empty() {
        repository.find_all_anrs().await?
    } else {
        repository.find_anrs_by_ids(anr_ids).await?
    };
    let partition = DatePartition::from_date(date);

    let mut stats = Vec::new();
    for anr in &anrs {
        let rows = repository.fetch_risk_rows(anr.id).await?;
        let entries = aggregate::build_entries(
            anr,
            &rows,
            &options.stats_types,
            partition,
            options.series_limit,
        );
        debug!(anr = anr.id, risks = rows.len(), entries = entries.len(), "aggregated record");
        stats.extend(entries);
    }

    Ok(stats)
}

pub struct StatsAnrService<R> {
    repository: R,
    api: StatsApiClient,
    options: CollectOptions,
}

impl<R: StatsRepository> StatsAnrService<R> {
    pub fn new(repository: R, api: StatsApiClient, options: CollectOptions) -> Self {
        Self {
            repository,
            api,
            options,
        }
    }

    /// Collects for the server's local calendar day, so day and week stamps
    /// roll over at local midnight.
    pub async fn collect_stats(&self, anr_ids: &[i32]) -> Result<CollectOutcome, StatsError> {
        self.collect_stats_on(Local::now().date_naive(), anr_ids).await
    }

    /// Collects and submits the stats of `today` unless that day was already
    /// collected, either according to the local marker or the remote API.
    pub async fn collect_stats_on(
        &self,
        today: NaiveDate,
        anr_ids: &[i32],
    ) -> Result<CollectOutcome, StatsError> {
        if self.repository.last_collected_on().await? == Some(today) {
            warn!(%today, "stats collection marker is already set for today");
            return Err(StatsError::AlreadyCollected);
        }

        for stats_type in &self.options.stats_types {
            let existing = self
                .api
                .get_stats(&StatsQuery::for_day(*stats_type, today))
                .await?;
            if existing.data.is_empty() {
                continue;
            }

            warn!(
                %today,
                %stats_type,
                entries = existing.data.len(),
                "stats API already holds today's stats"
            );
            if let Err(err) = self.repository.mark_collected(today).await {
                warn!(%today, error = ?err, "failed to write the stats collection marker");
            }
            return Err(StatsError::AlreadyCollected);
        }

        let stats = collect_data(&self.repository, anr_ids, &self.options, today).await?;
        if stats.is_empty() {
            info!(%today, requested = anr_ids.len(), "no stats to send");
            return Ok(CollectOutcome::NothingToSend);
        }

        self.api.send_stats(&stats).await?;
        self.repository.mark_collected(today).await?;
        info!(%today, entries = stats.len(), "stats sent");

        Ok(CollectOutcome::Sent {
            entries: stats.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatsApiConfig;
    use crate::models::{Anr, RiskRow};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct InMemoryRepository {
        anrs: Vec<Anr>,
        risks: HashMap<i32, Vec<RiskRow>>,
        marker: Mutex<Option<NaiveDate>>,
        fail_marker_writes: bool,
    }

    impl InMemoryRepository {
        fn with_records(count: i32) -> Self {
            let anrs = (1..=count)
                .map(|id| Anr {
                    id,
                    uuid: Uuid::new_v4(),
                    label: format!("ANR {id}"),
                    seuil1: 4,
                    seuil2: 8,
                })
                .collect();
            let risks = (1..=count)
                .map(|id| {
                    (
                        id,
                        vec![
                            RiskRow {
                                threat_label: "Theft".to_string(),
                                vulnerability_label: "Open door".to_string(),
                                max_risk: id * 3,
                            },
                            RiskRow {
                                threat_label: "Fire".to_string(),
                                vulnerability_label: "No extinguisher".to_string(),
                                max_risk: 2,
                            },
                        ],
                    )
                })
                .collect();

            Self {
                anrs,
                risks,
                marker: Mutex::new(None),
                fail_marker_writes: false,
            }
        }

        fn marker(&self) -> Option<NaiveDate> {
            *self.marker.lock().unwrap()
        }
    }

    impl StatsRepository for InMemoryRepository {
        async fn find_all_anrs(&self) -> anyhow::Result<Vec<Anr>> {
            Ok(self.anrs.clone())
        }

        async fn find_anrs_by_ids(&self, ids: &[i32]) -> anyhow::Result<Vec<Anr>> {
            Ok(self
                .anrs
                .iter()
                .filter(|anr| ids.contains(&anr.id))
                .cloned()
                .collect())
        }

        async fn fetch_risk_rows(&self, anr_id: i32) -> anyhow::Result<Vec<RiskRow>> {
            Ok(self.risks.get(&anr_id).cloned().unwrap_or_default())
        }

        async fn last_collected_on(&self) -> anyhow::Result<Option<NaiveDate>> {
            Ok(self.marker())
        }

        async fn mark_collected(&self, date: NaiveDate) -> anyhow::Result<()> {
            if self.fail_marker_writes {
                anyhow::bail!("settings table is unavailable");
            }
            *self.marker.lock().unwrap() = Some(date);
            Ok(())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn stats_response(results: Vec<serde_json::Value>) -> serde_json::Value {
        serde_json::json!({
            "metadata": {
                "resultset": {"count": results.len(), "offset": 0, "limit": 0}
            },
            "data": results
        })
    }

    fn service(
        server: &MockServer,
        repository: InMemoryRepository,
    ) -> StatsAnrService<InMemoryRepository> {
        service_with(server, repository, CollectOptions::default(), None)
    }

    fn service_with(
        server: &MockServer,
        repository: InMemoryRepository,
        options: CollectOptions,
        api_key: Option<&str>,
    ) -> StatsAnrService<InMemoryRepository> {
        let api = StatsApiClient::new(&StatsApiConfig {
            base_url: server.uri(),
            api_key: api_key.map(str::to_string),
            connect_timeout: Duration::from_secs(3),
            total_timeout: Duration::from_secs(30),
        })
        .expect("client should build");
        StatsAnrService::new(repository, api, options)
    }

    fn expected_risk_json(anrs: &[&Anr]) -> serde_json::Value {
        let entries: Vec<serde_json::Value> = anrs
            .iter()
            .map(|anr| {
                let score = anr.id * 3;
                let (low, medium, high) = match score {
                    s if s <= 4 => (2, 0, 0),
                    s if s <= 8 => (1, 1, 0),
                    _ => (1, 0, 1),
                };
                serde_json::json!({
                    "type": "risk",
                    "anr": anr.uuid,
                    "data": {
                        "category": anr.label,
                        "series": [
                            {"label": "Low risks", "value": low},
                            {"label": "Medium risks", "value": medium},
                            {"label": "High risks", "value": high}
                        ]
                    },
                    "day": 292,
                    "week": 43,
                    "month": 10,
                    "year": 2026
                })
            })
            .collect();
        serde_json::Value::Array(entries)
    }

    async fn mount_get(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/v1/stats/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fails_when_stats_already_exist_for_today() {
        let server = MockServer::start().await;
        mount_get(
            &server,
            stats_response(vec![serde_json::json!({
                "type": "risk",
                "data": {
                    "category": "ANR 1",
                    "series": [
                        {"label": "Low risks", "value": 50},
                        {"label": "Medium risks", "value": 30},
                        {"label": "High risks", "value": 10}
                    ]
                }
            })]),
        )
        .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let service = service(&server, InMemoryRepository::with_records(3));
        let err = service.collect_stats_on(today(), &[]).await.unwrap_err();

        assert!(matches!(err, StatsError::AlreadyCollected));
        assert_eq!(err.to_string(), "The stats is already collected for today.");
        assert_eq!(service.repository.marker(), Some(today()));
    }

    #[tokio::test]
    async fn local_marker_short_circuits_without_requests() {
        let server = MockServer::start().await;
        let repository = InMemoryRepository::with_records(2);
        *repository.marker.lock().unwrap() = Some(today());

        let service = service(&server, repository);
        let err = service.collect_stats_on(today(), &[]).await.unwrap_err();

        assert!(matches!(err, StatsError::AlreadyCollected));
        let requests = server.received_requests().await.expect("recording enabled");
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn marker_from_a_previous_day_does_not_block() {
        let server = MockServer::start().await;
        mount_get(&server, stats_response(vec![])).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/stats/"))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"status": "ok"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let repository = InMemoryRepository::with_records(1);
        *repository.marker.lock().unwrap() = today().pred_opt();

        let service = service(&server, repository);
        let outcome = service.collect_stats_on(today(), &[]).await.expect("collect");
        assert_eq!(outcome, CollectOutcome::Sent { entries: 1 });
    }

    #[tokio::test]
    async fn does_not_send_when_the_data_is_empty() {
        let server = MockServer::start().await;
        mount_get(&server, stats_response(vec![])).await;

        let service = service(&server, InMemoryRepository::with_records(3));
        let outcome = service
            .collect_stats_on(today(), &[99, 78])
            .await
            .expect("collect");

        assert_eq!(outcome, CollectOutcome::NothingToSend);
        let requests = server.received_requests().await.expect("recording enabled");
        let last = requests.last().expect("at least one request");
        assert_eq!(last.method.as_str(), "GET");
        assert_eq!(service.repository.marker(), None);
    }

    #[tokio::test]
    async fn sends_stats_for_all_anrs() {
        let server = MockServer::start().await;
        let repository = InMemoryRepository::with_records(4);
        let expected = expected_risk_json(&repository.anrs.iter().collect::<Vec<_>>());

        mount_get(&server, stats_response(vec![])).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/stats/"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"status": "ok"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server, repository);
        let outcome = service.collect_stats_on(today(), &[]).await.expect("collect");

        assert_eq!(outcome, CollectOutcome::Sent { entries: 4 });
        assert_eq!(service.repository.marker(), Some(today()));
    }

    #[tokio::test]
    async fn sends_stats_only_for_passed_anrs() {
        let server = MockServer::start().await;
        let repository = InMemoryRepository::with_records(5);
        let selected: Vec<&Anr> = repository
            .anrs
            .iter()
            .filter(|anr| [1, 2, 3].contains(&anr.id))
            .collect();
        assert_eq!(selected.len(), 3);
        let expected = expected_risk_json(&selected);

        mount_get(&server, stats_response(vec![])).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/stats/"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"status": "ok"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server, repository);
        let outcome = service
            .collect_stats_on(today(), &[1, 2, 3])
            .await
            .expect("collect");

        assert_eq!(outcome, CollectOutcome::Sent { entries: 3 });
    }

    #[tokio::test]
    async fn failed_submission_leaves_marker_unset() {
        let server = MockServer::start().await;
        mount_get(&server, stats_response(vec![])).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/stats/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server, InMemoryRepository::with_records(2));
        let err = service.collect_stats_on(today(), &[]).await.unwrap_err();

        assert!(matches!(err, StatsError::Api { status: 500, .. }));
        assert_eq!(service.repository.marker(), None);
    }

    #[tokio::test]
    async fn guard_checks_every_configured_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/stats/"))
            .and(query_param("type", "risk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stats_response(vec![])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/stats/"))
            .and(query_param("type", "threat"))
            .and(query_param("date_from", "2026-10-19"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stats_response(vec![
                serde_json::json!({
                    "type": "threat",
                    "data": {"category": "ANR 1", "series": [{"label": "Theft", "value": 1}]}
                }),
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let options = CollectOptions {
            stats_types: vec![StatsType::Risk, StatsType::Threat],
            series_limit: 10,
        };
        let service = service_with(&server, InMemoryRepository::with_records(2), options, None);
        let err = service.collect_stats_on(today(), &[]).await.unwrap_err();

        assert!(matches!(err, StatsError::AlreadyCollected));
        assert_eq!(service.repository.marker(), Some(today()));
    }

    #[tokio::test]
    async fn guard_queries_the_configured_type_when_risk_is_not_collected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/stats/"))
            .and(query_param("type", "threat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stats_response(vec![
                serde_json::json!({"type": "threat", "data": {"category": "ANR 1", "series": []}}),
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("type", "risk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stats_response(vec![])))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let options = CollectOptions {
            stats_types: vec![StatsType::Threat],
            series_limit: 10,
        };
        let service = service_with(&server, InMemoryRepository::with_records(1), options, None);
        let err = service.collect_stats_on(today(), &[]).await.unwrap_err();

        assert!(matches!(err, StatsError::AlreadyCollected));
    }

    #[tokio::test]
    async fn marker_write_failure_still_reports_already_collected() {
        let server = MockServer::start().await;
        mount_get(
            &server,
            stats_response(vec![serde_json::json!({
                "type": "risk",
                "data": {"category": "ANR 1", "series": []}
            })]),
        )
        .await;

        let mut repository = InMemoryRepository::with_records(1);
        repository.fail_marker_writes = true;

        let service = service(&server, repository);
        let err = service.collect_stats_on(today(), &[]).await.unwrap_err();

        assert!(matches!(err, StatsError::AlreadyCollected));
        assert_eq!(err.to_string(), "The stats is already collected for today.");
        assert_eq!(service.repository.marker(), None);
    }

    #[tokio::test]
    async fn every_request_carries_the_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/stats/"))
            .and(header("X-API-KEY", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stats_response(vec![])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/stats/"))
            .and(header("X-API-KEY", "secret"))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"status": "ok"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let service = service_with(
            &server,
            InMemoryRepository::with_records(2),
            CollectOptions::default(),
            Some("secret"),
        );
        let outcome = service.collect_stats_on(today(), &[]).await.expect("collect");

        assert_eq!(outcome, CollectOutcome::Sent { entries: 2 });
    }

    #[tokio::test]
    async fn collect_stats_stamps_the_local_calendar_day() {
        let server = MockServer::start().await;
        mount_get(&server, stats_response(vec![])).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/stats/"))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"status": "ok"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server, InMemoryRepository::with_records(1));
        service.collect_stats(&[]).await.expect("collect");

        let local_day = Local::now().date_naive();
        let requests = server.received_requests().await.expect("recording enabled");
        let post = requests.last().expect("post request");
        let body: serde_json::Value = serde_json::from_slice(&post.body).expect("json body");
        let partition = DatePartition::from_date(local_day);

        assert_eq!(body[0]["day"], partition.day);
        assert_eq!(body[0]["week"], partition.week);
        assert_eq!(body[0]["year"], partition.year);
        assert_eq!(service.repository.marker(), Some(local_day));
    }

    #[tokio::test]
    async fn collect_data_orders_entries_by_record_then_type() {
        let repository = InMemoryRepository::with_records(2);
        let options = CollectOptions {
            stats_types: vec![StatsType::Risk, StatsType::Threat],
            series_limit: 1,
        };

        let stats = collect_data(&repository, &[], &options, today())
            .await
            .expect("collect data");

        let keys: Vec<(Uuid, StatsType)> = stats
            .iter()
            .map(|entry| (entry.anr, entry.stats_type))
            .collect();
        assert_eq!(
            keys,
            vec![
                (repository.anrs[0].uuid, StatsType::Risk),
                (repository.anrs[0].uuid, StatsType::Threat),
                (repository.anrs[1].uuid, StatsType::Risk),
                (repository.anrs[1].uuid, StatsType::Threat),
            ]
        );
        assert_eq!(stats[1].data.series.len(), 1);
    }
}
