use std::fs;

use assert_matches::assert_matches;

use kira_read_ingest::blast::parse_blast_xml;
use kira_read_ingest::domain::Accession;
use kira_read_ingest::entrez::parse_gbseq_annotation;
use kira_read_ingest::error::KiraError;
use kira_read_ingest::normalize::compute_metrics;

#[test]
fn blast_fixture_uses_first_hsp_of_each_hit() {
    let xml = fs::read_to_string("tests/fixtures/blast_result.xml").unwrap();
    let hits = parse_blast_xml(&xml).unwrap();
    assert_eq!(hits.len(), 2);

    let first = &hits[0];
    assert_eq!(first.accession, "WP_000123456");
    assert_eq!(first.description, "DNA-binding protein HU-alpha [Escherichia coli]");
    assert_eq!(first.score, 92.4);
    assert_eq!(first.query_span, 120);
    assert_eq!(first.query_end, 120);
    assert_eq!(first.hit_span, 40);
    assert_eq!(first.identity_count, 30);
    assert_eq!(first.positive_count, 36);
    assert_eq!(first.evalue, 3.1e-21);
}

#[test]
fn reverse_frame_hit_counts_span_from_both_ends() {
    let xml = fs::read_to_string("tests/fixtures/blast_result.xml").unwrap();
    let hits = parse_blast_xml(&xml).unwrap();
    let reverse = &hits[1];
    assert_eq!(reverse.query_span, 90);
    assert_eq!(reverse.query_end, 150);

    let metrics = compute_metrics(reverse).unwrap();
    assert_eq!(metrics.query_cover, 60.0);
    assert_eq!(metrics.identity, 70.0);
    assert_eq!(metrics.positives, 83.3);
}

#[test]
fn blast_output_without_hits_is_empty() {
    let xml = r#"<?xml version="1.0"?>
<BlastOutput>
  <BlastOutput_program>blastx</BlastOutput_program>
  <BlastOutput_iterations>
    <Iteration>
      <Iteration_iter-num>1</Iteration_iter-num>
      <Iteration_hits></Iteration_hits>
      <Iteration_message>No hits found</Iteration_message>
    </Iteration>
  </BlastOutput_iterations>
</BlastOutput>"#;
    assert!(parse_blast_xml(xml).unwrap().is_empty());
}

#[test]
fn garbage_blast_response_is_search_failure() {
    let err = parse_blast_xml("<html><body>Server busy</body>").unwrap_err();
    assert_matches!(err, KiraError::SearchUnavailable(_));
}

#[test]
fn gbseq_fixture_yields_annotation() {
    let xml = fs::read_to_string("tests/fixtures/gbseq_protein.xml").unwrap();
    let accession: Accession = "WP_000123456".parse().unwrap();
    let annotation = parse_gbseq_annotation(&accession, &xml).unwrap();
    assert_eq!(annotation.protein_name, "DNA-binding protein HU-alpha");
    assert_eq!(annotation.organism, "Escherichia coli");
    assert!(annotation.comment.starts_with("REFSEQ:"));
}

#[test]
fn empty_gbset_is_annotation_failure() {
    let accession: Accession = "WP_000123456".parse().unwrap();
    let err = parse_gbseq_annotation(&accession, "<GBSet></GBSet>").unwrap_err();
    assert_matches!(err, KiraError::AnnotationUnavailable { .. });
}
