use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;

use crate::domain::ReadRecord;
use crate::error::KiraError;

const PHRED_OFFSET: u8 = 33;

pub fn read_fastq(path: &Utf8Path) -> Result<Vec<ReadRecord>, KiraError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| KiraError::input(path.as_std_path(), err.to_string()))?;
    let reader: Box<dyn Read> = if path.extension() == Some("gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    parse_fastq(BufReader::new(reader), path)
}

pub fn parse_fastq<R: BufRead>(reader: R, path: &Utf8Path) -> Result<Vec<ReadRecord>, KiraError> {
    let fail = |line: usize, message: String| {
        KiraError::input(path.as_std_path(), format!("line {line}: {message}"))
    };

    let mut records = Vec::new();
    let mut lines = reader.lines().enumerate().filter_map(|(idx, line)| match line {
        Ok(line) if line.trim().is_empty() => None,
        other => Some((idx + 1, other)),
    });

    while let Some((line_no, title)) = lines.next() {
        let title = title.map_err(|err| fail(line_no, err.to_string()))?;
        let title = title
            .strip_prefix('@')
            .ok_or_else(|| fail(line_no, "record header must start with '@'".to_string()))?;
        let header = title
            .split_whitespace()
            .next()
            .ok_or_else(|| fail(line_no, "empty record header".to_string()))?
            .to_string();

        let mut next_line = |what: &str| -> Result<(usize, String), KiraError> {
            match lines.next() {
                Some((idx, Ok(line))) => Ok((idx, line.trim_end().to_string())),
                Some((idx, Err(err))) => Err(fail(idx, err.to_string())),
                None => Err(fail(
                    line_no,
                    format!("truncated record {header}: missing {what}"),
                )),
            }
        };

        let (_, sequence) = next_line("sequence")?;
        let (sep_no, separator) = next_line("separator")?;
        if !separator.starts_with('+') {
            return Err(fail(sep_no, "separator line must start with '+'".to_string()));
        }
        let (qual_no, quality) = next_line("quality")?;
        if quality.len() != sequence.len() {
            return Err(fail(
                qual_no,
                format!(
                    "sequence and quality lengths differ for {header} ({} vs {})",
                    sequence.len(),
                    quality.len()
                ),
            ));
        }

        let mut score = 0u64;
        for byte in quality.bytes() {
            let phred = byte.checked_sub(PHRED_OFFSET).ok_or_else(|| {
                fail(qual_no, format!("invalid quality character {:?}", byte as char))
            })?;
            score += u64::from(phred);
        }

        records.push(ReadRecord::new(header, sequence, score));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use std::io::Cursor;

    use super::*;

    fn parse(text: &str) -> Result<Vec<ReadRecord>, KiraError> {
        parse_fastq(Cursor::new(text), Utf8Path::new("reads.fastq"))
    }

    #[test]
    fn parse_records_and_sum_quality() {
        let records = parse("@SEQ001/1 extra words\nACGT\n+\nIIII\n\n@SEQ002/1\nAC\n+SEQ002/1\n!+\n")
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].header, "SEQ001/1");
        assert_eq!(records[0].sequence, "ACGT");
        assert_eq!(records[0].quality, 4 * 40);
        assert_eq!(records[1].header, "SEQ002/1");
        assert_eq!(records[1].quality, 10);
    }

    #[test]
    fn truncated_record_is_input_error() {
        let err = parse("@SEQ001/1\nACGT\n+\n").unwrap_err();
        assert_matches!(err, KiraError::Input { .. });
    }

    #[test]
    fn length_mismatch_is_input_error() {
        let err = parse("@SEQ001/1\nACGT\n+\nIII\n").unwrap_err();
        assert_matches!(err, KiraError::Input { .. });
    }

    #[test]
    fn missing_at_sign_is_input_error() {
        let err = parse(">SEQ001/1\nACGT\n+\nIIII\n").unwrap_err();
        assert_matches!(err, KiraError::Input { .. });
    }
}
