//! Metering gateway: request body for one window and conversion of the
//! gateway's answer into measurements.

use chrono::{DateTime, FixedOffset, Utc};
use meterlink_core::{MeasureType, Measurement, RemoteError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Body of a detailed-measures request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeteringRequest {
    pub demande: Demande,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Demande {
    pub initiateur_login: String,
    pub point_id: String,
    pub mesures_type_code: &'static str,
    pub date_debut: String,
    pub date_fin: String,
    pub mesures_corrigees: bool,
    pub soutirage: bool,
    pub injection: bool,
    pub accord_client: bool,
    pub grandeur_physique: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesures_pas: Option<&'static str>,
}

impl MeteringRequest {
    pub fn new(
        initiator: &str,
        metering_point: &str,
        kind: MeasureType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Self {
        let (mesures_type_code, grandeur_physique, mesures_pas) = match kind {
            MeasureType::Pmax => ("PMAX", "PMA", Some("P1M")),
            MeasureType::Cdc => ("COURBE", "PA", None),
            MeasureType::Consoglo => ("ENERGIE", "EA", None),
        };
        Self {
            demande: Demande {
                initiateur_login: initiator.to_string(),
                point_id: metering_point.to_string(),
                mesures_type_code,
                date_debut: from.format("%Y-%m-%d").to_string(),
                date_fin: to.format("%Y-%m-%d").to_string(),
                mesures_corrigees: false,
                soutirage: true,
                injection: false,
                accord_client: true,
                grandeur_physique,
                mesures_pas,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MeteringResponse {
    #[serde(default)]
    pub grandeur: Vec<Grandeur>,
}

/// One physical quantity of the answer and its dated values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Grandeur {
    #[serde(default)]
    pub unite: Option<String>,
    #[serde(default)]
    pub mesure: Vec<Mesure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Mesure {
    pub v: Option<i64>,
    pub d: DateTime<FixedOffset>,
}

impl MeteringResponse {
    /// Measurements in answer order, null values dropped.
    ///
    /// Curve values are half-hour average powers and are halved into Wh.
    /// An answer with values but none of them set is an error.
    pub fn into_measurements(self, kind: MeasureType) -> Result<Vec<Measurement>, RemoteError> {
        let mut total = 0usize;
        let mut out = Vec::new();
        for mesure in self.grandeur.into_iter().flat_map(|g| g.mesure) {
            total += 1;
            let Some(v) = mesure.v else {
                warn!(kind = %kind, timestamp = %mesure.d, "gateway measure is null");
                continue;
            };
            let value = if kind.is_curve() { v / 2 } else { v };
            out.push(Measurement::new(kind, mesure.d.with_timezone(&Utc), value));
        }
        if total > 0 && out.is_empty() {
            return Err(RemoteError::Transport(format!(
                "all {kind} measures returned for this window are null"
            )));
        }
        Ok(out)
    }
}

#[cfg(feature = "http")]
pub use client::{MeteringClient, MeteringConfig};

#[cfg(feature = "http")]
mod client {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use meterlink_core::{MeasureType, Measurement, MeteringApi, RemoteError};
    use tracing::{debug, warn};

    use super::{MeteringRequest, MeteringResponse};
    use crate::http::SyncError;

    #[derive(Debug, Clone)]
    pub struct MeteringConfig {
        pub base_url: String,
        pub username: String,
        pub password: String,
        /// Login of the person on whose behalf requests are issued.
        pub initiator: String,
    }

    /// HTTP client for the metering gateway's detailed-measures operation.
    pub struct MeteringClient {
        client: reqwest::Client,
        base_url: String,
        username: String,
        password: String,
        initiator: String,
    }

    impl MeteringClient {
        pub fn new(config: MeteringConfig) -> Result<Self, SyncError> {
            let client = reqwest::Client::builder().build()?;
            Ok(Self {
                client,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                username: config.username,
                password: config.password,
                initiator: config.initiator,
            })
        }

        async fn request(
            &self,
            metering_point: &str,
            kind: MeasureType,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<MeteringResponse, SyncError> {
            let url = format!("{}/consulterMesuresDetaillees", self.base_url);
            let body = MeteringRequest::new(&self.initiator, metering_point, kind, from, to);
            debug!(
                kind = %kind,
                type_code = body.demande.mesures_type_code,
                from = %body.demande.date_debut,
                to = %body.demande.date_fin,
                "requesting measures from gateway"
            );

            let resp = self
                .client
                .post(&url)
                .basic_auth(&self.username, Some(&self.password))
                .json(&body)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(SyncError::Server {
                    status: status.as_u16(),
                    body,
                });
            }
            let text = resp.text().await?;
            Ok(serde_json::from_str(&text)?)
        }
    }

    #[async_trait]
    impl MeteringApi for MeteringClient {
        async fn fetch(
            &self,
            metering_point: &str,
            kind: MeasureType,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Measurement>, RemoteError> {
            match self.request(metering_point, kind, from, to).await {
                Ok(response) => response.into_measurements(kind),
                Err(e) => {
                    warn!(kind = %kind, error = %e, "cannot recover measures from gateway");
                    Err(e.into())
                }
            }
        }
    }

}
