use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use tracing::debug;

use crate::domain::{NormalizedHit, PairingRule, ReadRecord, TrailingDigitPairing};
use crate::error::KiraError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub reads: u64,
    pub organisms: u64,
    pub proteins: u64,
    pub hits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedRead {
    pub read_id: i64,
    pub hits_stored: usize,
    pub paired_with: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredProtein {
    pub name: String,
    pub comment: String,
    pub accession: String,
}

pub struct HitStore {
    conn: Connection,
    pairing: Box<dyn PairingRule>,
}

impl HitStore {
    pub fn new(conn: Connection) -> Self {
        Self::with_pairing(conn, Box::new(TrailingDigitPairing))
    }

    pub fn with_pairing(conn: Connection, pairing: Box<dyn PairingRule>) -> Self {
        Self { conn, pairing }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn persist(
        &mut self,
        read: &ReadRecord,
        hits: &[NormalizedHit],
    ) -> Result<PersistedRead, KiraError> {
        let tx = self.conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO read (header, sequence, quality_score)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(header) DO NOTHING;",
            params![read.header, read.sequence, read.quality as i64],
        )?;
        if inserted == 0 {
            return Err(KiraError::DuplicateRead(read.header.clone()));
        }
        let read_id = tx.last_insert_rowid();

        let paired_with = link_mate(&tx, self.pairing.as_ref(), &read.header, read_id)?;

        for hit in hits {
            let organism_id = upsert_organism(&tx, &hit.annotation.organism)?;
            let protein_id = upsert_protein(&tx, hit)?;
            tx.execute(
                "INSERT INTO hit (
                    read_id,
                    organism_id,
                    protein_id,
                    score,
                    query_cover,
                    identity,
                    positives,
                    evalue
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    read_id,
                    organism_id,
                    protein_id,
                    hit.metrics.score,
                    hit.metrics.query_cover,
                    hit.metrics.identity,
                    hit.metrics.positives,
                    hit.metrics.evalue,
                ],
            )?;
        }

        tx.commit()?;
        debug!(header = %read.header, read_id, hits = hits.len(), "read persisted");

        Ok(PersistedRead {
            read_id,
            hits_stored: hits.len(),
            paired_with,
        })
    }

    pub fn contains_read(&self, header: &str) -> Result<bool, KiraError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM read WHERE header = ?1;",
                params![header],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn read_pair(&self, header: &str) -> Result<Option<String>, KiraError> {
        let mate = self
            .conn
            .query_row(
                "SELECT mate.header
                 FROM read
                 JOIN read AS mate ON mate.id = read.pair_id
                 WHERE read.header = ?1;",
                params![header],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(mate)
    }

    pub fn hit_count_for(&self, header: &str) -> Result<u64, KiraError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*)
             FROM hit
             JOIN read ON read.id = hit.read_id
             WHERE read.header = ?1;",
            params![header],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count as u64)
    }

    pub fn protein(&self, accession: &str) -> Result<Option<StoredProtein>, KiraError> {
        let protein = self
            .conn
            .query_row(
                "SELECT name, comment, accession FROM protein WHERE accession = ?1;",
                params![accession],
                |row| {
                    Ok(StoredProtein {
                        name: row.get(0)?,
                        comment: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        accession: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(protein)
    }

    pub fn counts(&self) -> Result<StoreCounts, KiraError> {
        let counts = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM read),
                (SELECT COUNT(*) FROM organism),
                (SELECT COUNT(*) FROM protein),
                (SELECT COUNT(*) FROM hit);",
            [],
            |row| {
                Ok(StoreCounts {
                    reads: row.get::<_, i64>(0)? as u64,
                    organisms: row.get::<_, i64>(1)? as u64,
                    proteins: row.get::<_, i64>(2)? as u64,
                    hits: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(counts)
    }
}

fn link_mate(
    tx: &Transaction<'_>,
    pairing: &dyn PairingRule,
    header: &str,
    read_id: i64,
) -> Result<Option<i64>, KiraError> {
    let Some(mate_header) = pairing.mate_of(header) else {
        return Ok(None);
    };
    let mate_id = tx
        .query_row(
            "SELECT id FROM read WHERE header = ?1;",
            params![mate_header],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if let Some(mate_id) = mate_id {
        tx.execute(
            "UPDATE read SET pair_id = ?1 WHERE id = ?2;",
            params![mate_id, read_id],
        )?;
        tx.execute(
            "UPDATE read SET pair_id = ?1 WHERE id = ?2;",
            params![read_id, mate_id],
        )?;
    }
    Ok(mate_id)
}

fn upsert_organism(tx: &Transaction<'_>, name: &str) -> Result<i64, KiraError> {
    tx.execute(
        "INSERT INTO organism (name) VALUES (?1) ON CONFLICT(name) DO NOTHING;",
        params![name],
    )?;
    let id = tx.query_row(
        "SELECT id FROM organism WHERE name = ?1;",
        params![name],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(id)
}

fn upsert_protein(tx: &Transaction<'_>, hit: &NormalizedHit) -> Result<i64, KiraError> {
    let comment = Some(hit.annotation.comment.as_str()).filter(|value| !value.is_empty());
    tx.execute(
        "INSERT INTO protein (name, comment, accession)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(accession) DO NOTHING;",
        params![
            hit.annotation.protein_name,
            comment,
            hit.accession.as_str()
        ],
    )?;
    let id = tx.query_row(
        "SELECT id FROM protein WHERE accession = ?1;",
        params![hit.accession.as_str()],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::db::open_db_in_memory;
    use crate::domain::{HitMetrics, ProteinAnnotation};

    fn store() -> HitStore {
        HitStore::new(open_db_in_memory().unwrap())
    }

    fn hit(accession: &str, organism: &str, comment: &str) -> NormalizedHit {
        NormalizedHit {
            accession: accession.parse().unwrap(),
            annotation: ProteinAnnotation {
                protein_name: format!("protein {accession}"),
                comment: comment.to_string(),
                organism: organism.to_string(),
            },
            metrics: HitMetrics {
                score: 55.4,
                query_cover: 98.0,
                identity: 71.2,
                positives: 80.3,
                evalue: 2e-12,
            },
        }
    }

    #[test]
    fn shared_organism_and_protein_are_stored_once() {
        let mut store = store();
        let hits = vec![hit("AAA1", "Homo sapiens", ""), hit("BBB2", "Homo sapiens", "")];
        store
            .persist(&ReadRecord::new("R1/1", "ACGT", 160), &hits)
            .unwrap();
        store
            .persist(&ReadRecord::new("R2/1", "TTGA", 150), &hits[..1])
            .unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.reads, 2);
        assert_eq!(counts.organisms, 1);
        assert_eq!(counts.proteins, 2);
        assert_eq!(counts.hits, 3);
        assert_eq!(store.hit_count_for("R1/1").unwrap(), 2);
    }

    #[test]
    fn duplicate_read_changes_nothing() {
        let mut store = store();
        let read = ReadRecord::new("R1/1", "ACGT", 160);
        store.persist(&read, &[hit("AAA1", "Mus musculus", "")]).unwrap();
        let before = store.counts().unwrap();

        let err = store
            .persist(&read, &[hit("ZZZ9", "Danio rerio", "")])
            .unwrap_err();
        assert_matches!(err, KiraError::DuplicateRead(header) if header == "R1/1");
        assert_eq!(store.counts().unwrap(), before);
    }

    #[test]
    fn mates_are_linked_both_ways_in_either_order() {
        let mut store = store();
        let reverse = store
            .persist(&ReadRecord::new("SEQ7/2", "GGCC", 90), &[])
            .unwrap();
        assert_eq!(reverse.paired_with, None);
        assert_eq!(store.read_pair("SEQ7/2").unwrap(), None);

        let forward = store
            .persist(&ReadRecord::new("SEQ7/1", "CCGG", 95), &[])
            .unwrap();
        assert_eq!(forward.paired_with, Some(reverse.read_id));
        assert_eq!(store.read_pair("SEQ7/1").unwrap().as_deref(), Some("SEQ7/2"));
        assert_eq!(store.read_pair("SEQ7/2").unwrap().as_deref(), Some("SEQ7/1"));
    }

    struct FwdRevPairing;

    impl PairingRule for FwdRevPairing {
        fn mate_of(&self, header: &str) -> Option<String> {
            if let Some(stem) = header.strip_suffix("_fwd") {
                return Some(format!("{stem}_rev"));
            }
            header.strip_suffix("_rev").map(|stem| format!("{stem}_fwd"))
        }
    }

    #[test]
    fn substituted_pairing_rule_links_mates() {
        let mut store =
            HitStore::with_pairing(open_db_in_memory().unwrap(), Box::new(FwdRevPairing));
        let forward = store
            .persist(&ReadRecord::new("S12_fwd", "ACGT", 40), &[])
            .unwrap();
        let reverse = store
            .persist(&ReadRecord::new("S12_rev", "TGCA", 41), &[])
            .unwrap();
        assert_eq!(reverse.paired_with, Some(forward.read_id));
        assert_eq!(store.read_pair("S12_fwd").unwrap().as_deref(), Some("S12_rev"));
        assert_eq!(store.read_pair("S12_rev").unwrap().as_deref(), Some("S12_fwd"));

        store.persist(&ReadRecord::new("S13/1", "AC", 10), &[]).unwrap();
        store.persist(&ReadRecord::new("S13/2", "GT", 10), &[]).unwrap();
        assert_eq!(store.read_pair("S13/1").unwrap(), None);
    }

    #[test]
    fn unpaired_header_has_no_mate() {
        let mut store = store();
        store.persist(&ReadRecord::new("READ_A", "AC", 10), &[]).unwrap();
        assert_eq!(store.read_pair("READ_A").unwrap(), None);
        assert!(store.contains_read("READ_A").unwrap());
        assert!(!store.contains_read("READ_B").unwrap());
    }

    #[test]
    fn empty_comment_is_stored_as_null() {
        let mut store = store();
        store
            .persist(
                &ReadRecord::new("R1/1", "ACGT", 160),
                &[hit("AAA1", "Homo sapiens", ""), hit("BBB2", "Homo sapiens", "curated")],
            )
            .unwrap();

        let nulls: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM protein WHERE comment IS NULL;", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(nulls, 1);
        assert_eq!(store.protein("AAA1").unwrap().unwrap().comment, "");
        assert_eq!(store.protein("BBB2").unwrap().unwrap().comment, "curated");
    }

    #[test]
    fn failed_hit_insert_rolls_back_the_whole_read() {
        let mut store = store();
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_second_hit BEFORE INSERT ON hit
                 WHEN (SELECT COUNT(*) FROM hit) >= 1
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let err = store
            .persist(
                &ReadRecord::new("R1/1", "ACGT", 160),
                &[hit("AAA1", "Homo sapiens", ""), hit("BBB2", "Bos taurus", "")],
            )
            .unwrap_err();
        assert_matches!(err, KiraError::Storage(_));
        assert_eq!(
            store.counts().unwrap(),
            StoreCounts {
                reads: 0,
                organisms: 0,
                proteins: 0,
                hits: 0,
            }
        );
        assert!(!store.contains_read("R1/1").unwrap());
    }
}
