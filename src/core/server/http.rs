use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::core::server::{
    AnnotationSink, ImageRepository, JobControl, JobUpdate, RoiQuery, RoiRepository,
};
use crate::models::{
    AnnotationGeometry, ImageId, ImageInstance, JobId, ProjectId, RoiDescriptor, RoiId,
};

/// Blocking client for the Cytomine REST API.
///
/// Request signing is left to whatever issues the authorization value;
/// the client only forwards it.
pub struct CytomineClient {
    base_url: String,
    client: Client,
    authorization: Option<String>,
    job: Option<JobId>,
    timeout_secs: u64,
}

impl std::fmt::Debug for CytomineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CytomineClient")
            .field("base_url", &self.base_url)
            .field("job", &self.job)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// List endpoints answer either with a bare array or `{"collection": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Wrapped { collection: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Wrapped { collection } => collection,
            Listing::Bare(items) => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageInstanceRecord {
    id: i64,
    project: i64,
    #[serde(default)]
    instance_filename: Option<String>,
}

#[derive(Deserialize)]
struct AnnotationRecord {
    id: i64,
    image: i64,
    project: i64,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobUpdateBody<'a> {
    id: i64,
    status: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<u8>,
    status_comment: &'a str,
}

impl CytomineClient {
    pub fn new(host: &str, timeout_secs: u64, authorization: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let host = host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        Ok(Self {
            base_url,
            client,
            authorization,
            job: None,
            timeout_secs,
        })
    }

    /// Report status and progress against this server-side job
    pub fn with_job(mut self, job: Option<JobId>) -> Self {
        self.job = job;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.authorization {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder, what: &str) -> anyhow::Result<Response> {
        let response = self.authorize(request).send().map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!("{}: request timed out after {}s", what, self.timeout_secs)
            } else if e.is_connect() {
                anyhow::anyhow!("{}: cannot connect to {}", what, self.base_url)
            } else {
                anyhow::Error::new(e).context(what.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            anyhow::bail!("{}: server answered {}: {}", what, status.as_u16(), body.trim());
        }
        Ok(response)
    }

    fn get_listing<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> anyhow::Result<Vec<T>> {
        let request = self.client.get(self.url(path)).query(query);
        let listing: Listing<T> = self
            .send(request, what)?
            .json()
            .with_context(|| format!("{}: malformed response", what))?;
        Ok(listing.into_vec())
    }
}

/// Query string of an annotation listing; `term` only when one is given
fn roi_query_params(query: &RoiQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("project", query.project.to_string()),
        ("image", query.image.to_string()),
        ("showWKT", "true".to_string()),
        ("showTerm", "true".to_string()),
    ];
    if let Some(term) = query.term {
        params.push(("term", term.to_string()));
    }
    params
}

impl ImageRepository for CytomineClient {
    fn get_images(&self, project: ProjectId) -> anyhow::Result<Vec<ImageInstance>> {
        let records: Vec<ImageInstanceRecord> = self.get_listing(
            &format!("project/{}/imageinstance.json", project),
            &[],
            "Listing images",
        )?;
        Ok(records
            .into_iter()
            .map(|r| ImageInstance {
                id: ImageId(r.id),
                project: ProjectId(r.project),
                filename: r.instance_filename,
            })
            .collect())
    }
}

impl RoiRepository for CytomineClient {
    fn get_rois(&self, query: &RoiQuery) -> anyhow::Result<Vec<RoiDescriptor>> {
        let records: Vec<AnnotationRecord> = self.get_listing(
            "annotation.json",
            &roi_query_params(query),
            "Listing ROI annotations",
        )?;
        records
            .into_iter()
            .map(|r| {
                let location = r
                    .location
                    .ok_or_else(|| anyhow::anyhow!("Annotation {} has no location", r.id))?;
                Ok(RoiDescriptor {
                    id: RoiId(r.id),
                    image: ImageId(r.image),
                    project: ProjectId(r.project),
                    location,
                })
            })
            .collect()
    }

    fn dump_roi(&self, roi: &RoiDescriptor, dest: &Path) -> anyhow::Result<()> {
        let what = format!("Dumping ROI {}", roi.id);
        let request = self
            .client
            .get(self.url(&format!("annotation/{}/crop.png", roi.id)));
        let bytes = self.send(request, &what)?.bytes()?;
        fs::write(dest, &bytes)
            .with_context(|| format!("Failed to write ROI crop to {:?}", dest))?;
        Ok(())
    }
}

impl AnnotationSink for CytomineClient {
    fn save_annotations(&self, annotations: &[AnnotationGeometry]) -> anyhow::Result<()> {
        if annotations.is_empty() {
            return Ok(());
        }
        let request = self.client.post(self.url("annotation.json")).json(annotations);
        self.send(
            request,
            &format!("Saving {} annotations", annotations.len()),
        )?;
        Ok(())
    }
}

impl JobControl for CytomineClient {
    fn update_job(&self, update: &JobUpdate) -> anyhow::Result<()> {
        let Some(job) = self.job else {
            tracing::debug!(
                status = ?update.status,
                progress = ?update.progress,
                comment = %update.comment,
                "No job attached, status kept local"
            );
            return Ok(());
        };
        let body = JobUpdateBody {
            id: job.0,
            status: update.status.code(),
            progress: update.progress,
            status_comment: &update.comment,
        };
        let request = self.client.put(self.url(&format!("job/{}.json", job))).json(&body);
        self.send(request, "Updating job status")?;
        Ok(())
    }
}
