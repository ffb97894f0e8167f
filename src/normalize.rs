use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::domain::{Accession, HitMetrics, NormalizedHit, ProteinAnnotation, RawHit};
use crate::entrez::AnnotationClient;
use crate::error::KiraError;

#[derive(Debug, Clone, Serialize)]
pub struct RejectedHit {
    pub accession: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub hits: Vec<NormalizedHit>,
    pub rejected: Vec<RejectedHit>,
}

/// Percentages rounded to one decimal, as stored.
pub fn compute_metrics(raw: &RawHit) -> Result<HitMetrics, KiraError> {
    let malformed = |reason: &str| KiraError::MalformedHit {
        accession: raw.accession.clone(),
        reason: reason.to_string(),
    };
    if raw.query_end == 0 {
        return Err(malformed("query end is zero"));
    }
    if raw.hit_span == 0 {
        return Err(malformed("hit span is zero"));
    }
    Ok(HitMetrics {
        score: raw.score,
        query_cover: percent(raw.query_span, raw.query_end),
        identity: percent(raw.identity_count, raw.hit_span),
        positives: percent(raw.positive_count, raw.hit_span),
        evalue: raw.evalue,
    })
}

fn percent(part: u32, whole: u32) -> f64 {
    let value = f64::from(part) / f64::from(whole) * 100.0;
    (value * 10.0).round() / 10.0
}

pub struct Normalizer<A: AnnotationClient> {
    annotations: A,
    cache: HashMap<Accession, ProteinAnnotation>,
}

impl<A: AnnotationClient> Normalizer<A> {
    pub fn new(annotations: A) -> Self {
        Self {
            annotations,
            cache: HashMap::new(),
        }
    }

    pub fn cached_annotations(&self) -> usize {
        self.cache.len()
    }

    pub fn normalize(&mut self, raw_hits: &[RawHit]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for raw in raw_hits {
            match self.normalize_one(raw) {
                Ok(hit) => batch.hits.push(hit),
                Err(err) => {
                    warn!(accession = %raw.accession, error = %err, "hit rejected");
                    batch.rejected.push(RejectedHit {
                        accession: raw.accession.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        batch
    }

    fn normalize_one(&mut self, raw: &RawHit) -> Result<NormalizedHit, KiraError> {
        let accession: Accession = raw.accession.parse().map_err(|_| KiraError::MalformedHit {
            accession: raw.accession.clone(),
            reason: "invalid accession".to_string(),
        })?;
        let metrics = compute_metrics(raw)?;
        let annotation = self.annotation(&accession)?;
        Ok(NormalizedHit {
            accession,
            annotation,
            metrics,
        })
    }

    fn annotation(&mut self, accession: &Accession) -> Result<ProteinAnnotation, KiraError> {
        if let Some(found) = self.cache.get(accession) {
            return Ok(found.clone());
        }
        let annotation = self.annotations.lookup(accession)?;
        self.cache.insert(accession.clone(), annotation.clone());
        Ok(annotation)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    fn raw(accession: &str) -> RawHit {
        RawHit {
            accession: accession.to_string(),
            description: String::new(),
            score: 80.1,
            query_span: 60,
            query_end: 120,
            identity_count: 45,
            hit_span: 90,
            positive_count: 60,
            evalue: 1e-30,
        }
    }

    #[derive(Default)]
    struct CountingAnnotations {
        calls: Mutex<usize>,
    }

    impl AnnotationClient for CountingAnnotations {
        fn lookup(&self, accession: &Accession) -> Result<ProteinAnnotation, KiraError> {
            *self.calls.lock().unwrap() += 1;
            if accession.as_str() == "BAD1" {
                return Err(KiraError::AnnotationUnavailable {
                    accession: accession.to_string(),
                    message: "not found".to_string(),
                });
            }
            Ok(ProteinAnnotation {
                protein_name: format!("protein {accession}"),
                comment: String::new(),
                organism: "Escherichia coli".to_string(),
            })
        }
    }

    #[test]
    fn metrics_are_percentages() {
        let metrics = compute_metrics(&raw("AAA1")).unwrap();
        assert_eq!(metrics.query_cover, 50.0);
        assert_eq!(metrics.identity, 50.0);
        assert_eq!(metrics.positives, 66.7);
        assert_eq!(metrics.score, 80.1);
        assert_eq!(metrics.evalue, 1e-30);
    }

    #[test]
    fn zero_spans_are_malformed() {
        let mut hit = raw("AAA1");
        hit.hit_span = 0;
        assert_matches!(compute_metrics(&hit), Err(KiraError::MalformedHit { .. }));
        let mut hit = raw("AAA1");
        hit.query_end = 0;
        assert_matches!(compute_metrics(&hit), Err(KiraError::MalformedHit { .. }));
    }

    #[test]
    fn failed_lookup_only_drops_that_hit() {
        let mut normalizer = Normalizer::new(CountingAnnotations::default());
        let batch = normalizer.normalize(&[raw("AAA1"), raw("BAD1"), raw("CCC3")]);
        assert_eq!(batch.hits.len(), 2);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].accession, "BAD1");
    }

    #[test]
    fn annotations_are_memoized() {
        let mut normalizer = Normalizer::new(CountingAnnotations::default());
        normalizer.normalize(&[raw("AAA1"), raw("AAA1")]);
        normalizer.normalize(&[raw("AAA1"), raw("BAD1")]);
        normalizer.normalize(&[raw("BAD1")]);
        assert_eq!(*normalizer.annotations.calls.lock().unwrap(), 3);
        assert_eq!(normalizer.cached_annotations(), 1);
    }
}
