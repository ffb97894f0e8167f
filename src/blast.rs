use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::RawHit;
use crate::error::KiraError;
use crate::http;

static RID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"RID = (\S+)").unwrap());
static RTOE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"RTOE = (\d+)").unwrap());
static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Status=(\w+)").unwrap());
static HITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ThereAreHits=(\w+)").unwrap());

pub trait SearchClient: Send + Sync {
    fn search(&self, sequence: &str) -> Result<Vec<RawHit>, KiraError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlastOptions {
    pub program: String,
    pub database: String,
    pub word_size: u32,
    pub expect: f64,
    pub filter: bool,
    pub matrix: String,
    pub gap_costs: String,
    pub hitlist_size: u32,
}

impl Default for BlastOptions {
    fn default() -> Self {
        Self {
            program: "blastx".to_string(),
            database: "nr".to_string(),
            word_size: 6,
            expect: 0.0001,
            filter: true,
            matrix: "BLOSUM62".to_string(),
            gap_costs: "11 1".to_string(),
            hitlist_size: 10,
        }
    }
}

impl BlastOptions {
    fn put_params(&self, sequence: &str) -> Vec<(&'static str, String)> {
        vec![
            ("CMD", "Put".to_string()),
            ("PROGRAM", self.program.clone()),
            ("DATABASE", self.database.clone()),
            ("QUERY", sequence.to_string()),
            ("WORD_SIZE", self.word_size.to_string()),
            ("EXPECT", self.expect.to_string()),
            ("FILTER", if self.filter { "T" } else { "F" }.to_string()),
            ("MATRIX_NAME", self.matrix.clone()),
            ("GAPCOSTS", self.gap_costs.clone()),
            ("HITLIST_SIZE", self.hitlist_size.to_string()),
            ("FORMAT_TYPE", "XML".to_string()),
            ("TOOL", "kira-ri".to_string()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Waiting,
    Ready { has_hits: bool },
    Failed,
    Unknown,
}

const BLAST_URL: &str = "https://blast.ncbi.nlm.nih.gov/Blast.cgi";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct BlastHttpClient {
    client: Client,
    base_url: String,
    options: BlastOptions,
    poll_interval: Duration,
    timeout: Duration,
}

impl BlastHttpClient {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Result<Self, KiraError> {
        Self::with_base_url(BLAST_URL, timeout, poll_interval)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, KiraError> {
        let client = http::build_client(REQUEST_TIMEOUT, KiraError::SearchUnavailable)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            options: BlastOptions::default(),
            poll_interval,
            timeout,
        })
    }

    fn check_deadline(&self, deadline: Instant) -> Result<Duration, KiraError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(KiraError::SearchUnavailable(format!(
                "search did not finish within {}s",
                self.timeout.as_secs()
            )));
        }
        Ok(remaining)
    }

    fn get_text(&self, params: &[(&str, &str)], deadline: Instant) -> Result<String, KiraError> {
        self.check_deadline(deadline)?;
        let response = http::send_before(
            || self.client.get(&self.base_url).query(params),
            deadline,
            REQUEST_TIMEOUT,
            KiraError::SearchUnavailable,
        )?;
        http::read_text(
            response,
            |status, message| KiraError::SearchStatus { status, message },
            KiraError::SearchUnavailable,
        )
    }

    fn submit(&self, sequence: &str, deadline: Instant) -> Result<(String, Duration), KiraError> {
        let params = self.options.put_params(sequence);
        let response = http::send_before(
            || self.client.post(&self.base_url).form(&params),
            deadline,
            REQUEST_TIMEOUT,
            KiraError::SearchUnavailable,
        )?;
        let body = http::read_text(
            response,
            |status, message| KiraError::SearchStatus { status, message },
            KiraError::SearchUnavailable,
        )?;
        parse_submission(&body)
    }
}

impl SearchClient for BlastHttpClient {
    fn search(&self, sequence: &str) -> Result<Vec<RawHit>, KiraError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let (rid, estimate) = self.submit(sequence, deadline)?;
        info!(rid = %rid, estimate_secs = estimate.as_secs(), "blast.submitted");

        let mut wait = estimate.max(self.poll_interval);
        loop {
            let remaining = self.check_deadline(deadline)?;
            thread::sleep(wait.min(remaining));
            wait = self.poll_interval;

            let body = self.get_text(
                &[
                    ("CMD", "Get"),
                    ("FORMAT_OBJECT", "SearchInfo"),
                    ("RID", rid.as_str()),
                ],
                deadline,
            )?;
            match parse_search_status(&body) {
                SearchStatus::Waiting => {
                    debug!(rid = %rid, "blast.waiting");
                    continue;
                }
                SearchStatus::Ready { has_hits: false } => {
                    info!(rid = %rid, latency_ms = started.elapsed().as_millis() as u64, "blast.no_hits");
                    return Ok(Vec::new());
                }
                SearchStatus::Ready { has_hits: true } => break,
                SearchStatus::Failed => {
                    return Err(KiraError::SearchUnavailable(format!("search {rid} failed")));
                }
                SearchStatus::Unknown => {
                    return Err(KiraError::SearchUnavailable(format!(
                        "search {rid} expired or is unknown"
                    )));
                }
            }
        }

        let xml = self.get_text(
            &[("CMD", "Get"), ("FORMAT_TYPE", "XML"), ("RID", rid.as_str())],
            deadline,
        )?;
        let hits = parse_blast_xml(&xml)?;
        info!(
            rid = %rid,
            hits = hits.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "blast.response"
        );
        Ok(hits)
    }
}

pub fn parse_submission(body: &str) -> Result<(String, Duration), KiraError> {
    let rid = RID_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            KiraError::SearchUnavailable("submission response carried no RID".to_string())
        })?;
    let rtoe = RTOE_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(0);
    Ok((rid, Duration::from_secs(rtoe)))
}

pub fn parse_search_status(body: &str) -> SearchStatus {
    let status = STATUS_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());
    match status {
        Some("WAITING") => SearchStatus::Waiting,
        Some("READY") => {
            let has_hits = HITS_RE
                .captures(body)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str() == "yes")
                .unwrap_or(false);
            SearchStatus::Ready { has_hits }
        }
        Some("FAILED") => SearchStatus::Failed,
        _ => SearchStatus::Unknown,
    }
}

/// Parses `BlastOutput` XML into one [`RawHit`] per hit, using its first HSP.
pub fn parse_blast_xml(xml: &str) -> Result<Vec<RawHit>, KiraError> {
    if !xml.contains("<BlastOutput") {
        return Err(KiraError::SearchUnavailable(
            "expected a BlastOutput XML document".to_string(),
        ));
    }
    let parsed: BlastOutputXml = quick_xml::de::from_str(xml)
        .map_err(|err| KiraError::SearchUnavailable(format!("malformed BLAST XML: {err}")))?;

    let hits = parsed
        .iterations
        .map(|iterations| iterations.iterations)
        .unwrap_or_default()
        .into_iter()
        .flat_map(|iteration| iteration.hits.map(|hits| hits.hits).unwrap_or_default())
        .filter_map(|hit| {
            let accession = hit.accession;
            let description = hit.definition.unwrap_or_default();
            let hsp = hit.hsps.and_then(|hsps| hsps.hsps.into_iter().next())?;
            Some(RawHit {
                accession,
                description,
                score: hsp.bit_score,
                query_span: hsp.query_from.abs_diff(hsp.query_to) + 1,
                query_end: hsp.query_from.max(hsp.query_to),
                identity_count: hsp.identity,
                hit_span: hsp.hit_from.abs_diff(hsp.hit_to) + 1,
                positive_count: hsp.positive,
                evalue: hsp.evalue,
            })
        })
        .collect();
    Ok(hits)
}

#[derive(Debug, Deserialize)]
struct BlastOutputXml {
    #[serde(rename = "BlastOutput_iterations")]
    iterations: Option<IterationsXml>,
}

#[derive(Debug, Deserialize)]
struct IterationsXml {
    #[serde(rename = "Iteration", default)]
    iterations: Vec<IterationXml>,
}

#[derive(Debug, Deserialize)]
struct IterationXml {
    #[serde(rename = "Iteration_hits")]
    hits: Option<HitsXml>,
}

#[derive(Debug, Deserialize)]
struct HitsXml {
    #[serde(rename = "Hit", default)]
    hits: Vec<HitXml>,
}

#[derive(Debug, Deserialize)]
struct HitXml {
    #[serde(rename = "Hit_accession")]
    accession: String,
    #[serde(rename = "Hit_def")]
    definition: Option<String>,
    #[serde(rename = "Hit_hsps")]
    hsps: Option<HspsXml>,
}

#[derive(Debug, Deserialize)]
struct HspsXml {
    #[serde(rename = "Hsp", default)]
    hsps: Vec<HspXml>,
}

#[derive(Debug, Deserialize)]
struct HspXml {
    #[serde(rename = "Hsp_bit-score")]
    bit_score: f64,
    #[serde(rename = "Hsp_evalue")]
    evalue: f64,
    #[serde(rename = "Hsp_query-from")]
    query_from: u32,
    #[serde(rename = "Hsp_query-to")]
    query_to: u32,
    #[serde(rename = "Hsp_hit-from")]
    hit_from: u32,
    #[serde(rename = "Hsp_hit-to")]
    hit_to: u32,
    #[serde(rename = "Hsp_identity")]
    identity: u32,
    #[serde(rename = "Hsp_positive")]
    positive: u32,
}
