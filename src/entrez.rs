use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{Accession, ProteinAnnotation, protein_name_from_description};
use crate::error::KiraError;
use crate::http;

/// Resolves a protein accession to its name, comment and source organism.
pub trait AnnotationClient: Send + Sync {
    fn lookup(&self, accession: &Accession) -> Result<ProteinAnnotation, KiraError>;
}

#[derive(Clone)]
pub struct EntrezHttpClient {
    client: Client,
    base_url: String,
    email: Option<String>,
    api_key: Option<String>,
}

impl EntrezHttpClient {
    pub fn new(email: Option<String>, api_key: Option<String>) -> Result<Self, KiraError> {
        let client = http::build_client(Duration::from_secs(60), |message| {
            KiraError::AnnotationUnavailable {
                accession: String::new(),
                message,
            }
        })?;
        Ok(Self {
            client,
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi".to_string(),
            email,
            api_key,
        })
    }

    fn query_params<'a>(&'a self, accession: &'a Accession) -> Vec<(&'static str, &'a str)> {
        let mut params = vec![
            ("db", "protein"),
            ("id", accession.as_str()),
            ("rettype", "gb"),
            ("retmode", "xml"),
            ("tool", "kira-ri"),
        ];
        if let Some(email) = self.email.as_deref() {
            params.push(("email", email));
        }
        if let Some(api_key) = self.api_key.as_deref() {
            params.push(("api_key", api_key));
        }
        params
    }
}

impl AnnotationClient for EntrezHttpClient {
    fn lookup(&self, accession: &Accession) -> Result<ProteinAnnotation, KiraError> {
        let unavailable = |message: String| KiraError::AnnotationUnavailable {
            accession: accession.to_string(),
            message,
        };
        let params = self.query_params(accession);
        let response = http::send_with_retries(
            || self.client.get(&self.base_url).query(&params),
            unavailable,
        )?;
        let xml = http::read_text(
            response,
            |status, message| unavailable(format!("efetch returned status {status}: {message}")),
            unavailable,
        )?;
        debug!(accession = %accession, bytes = xml.len(), "entrez.response");
        parse_gbseq_annotation(accession, &xml)
    }
}

/// Reads the first `GBSeq` record of an efetch `GBSet` document.
pub fn parse_gbseq_annotation(
    accession: &Accession,
    xml: &str,
) -> Result<ProteinAnnotation, KiraError> {
    let unavailable = |message: String| KiraError::AnnotationUnavailable {
        accession: accession.to_string(),
        message,
    };
    if !xml.to_ascii_lowercase().contains("<gbset") {
        return Err(unavailable("expected a GBSet XML document".to_string()));
    }
    let parsed: GbSetXml = quick_xml::de::from_str(xml)
        .map_err(|err| unavailable(format!("malformed GBSet XML: {err}")))?;
    let record = parsed
        .sequences
        .into_iter()
        .next()
        .ok_or_else(|| unavailable("no GBSeq record returned".to_string()))?;

    let definition = record
        .definition
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| unavailable("record has no definition".to_string()))?;
    let organism = record
        .organism
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| unavailable("record has no source organism".to_string()))?;

    Ok(ProteinAnnotation {
        protein_name: protein_name_from_description(&definition),
        comment: record
            .comment
            .map(|value| value.trim().to_string())
            .unwrap_or_default(),
        organism,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename = "GBSet")]
struct GbSetXml {
    #[serde(rename = "GBSeq", default)]
    sequences: Vec<GbSeqXml>,
}

#[derive(Debug, Deserialize)]
struct GbSeqXml {
    #[serde(rename = "GBSeq_definition")]
    definition: Option<String>,
    #[serde(rename = "GBSeq_organism")]
    organism: Option<String>,
    #[serde(rename = "GBSeq_comment")]
    comment: Option<String>,
}
