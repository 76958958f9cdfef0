//! Text-file ingestion of coverage regions and variant calls.
//!
//! Input files are whitespace-separated token streams: a record may span
//! lines and a line may hold several records.  Reading stops at end of
//! input or at the first token that fails to parse; a failed table insert
//! retracts everything the run loaded for the sample.

use std::collections::VecDeque;
use std::io::BufRead;

use tracing::warn;

use crate::store::{
    error::Error,
    iupac::Base,
    sample_set::SampleSet,
    seq::SequenceTable,
    table::{CoverageTable, MnvTable, SnvTable},
    HOMOZYGOUS, MAX_INSERTED_LEN, MAX_REFERENCE_LEN,
};

/// Whitespace-separated token reader over buffered input.
pub(crate) struct TokenReader<R> {
    reader: R,
    pending: VecDeque<String>,
    line_no: u64,
}

impl<R: BufRead> TokenReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        TokenReader {
            reader,
            pending: VecDeque::new(),
            line_no: 0,
        }
    }

    /// 1-based number of the most recently read line.
    pub(crate) fn line_no(&self) -> u64 {
        self.line_no
    }

    /// The next token, or `None` at end of input.
    pub(crate) fn next_token(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            self.pending
                .extend(line.split_whitespace().map(str::to_owned));
        }
    }
}

/// One `reference start end` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CoverageRecord {
    pub reference: String,
    pub start: u32,
    pub end: u32,
}

/// One `reference start end phase len inserted` record.
///
/// `phase` and `len` keep their on-wire form so annotation can echo them;
/// normalisation happens on the way into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VariantRecord {
    pub reference: String,
    pub start: u32,
    pub end: u32,
    pub phase: i64,
    pub len: i64,
    pub inserted: String,
}

impl VariantRecord {
    /// Records in canonical single-nucleotide form go to the SNV table.
    pub(crate) fn is_snv(&self) -> bool {
        self.len == 1
            && self.inserted != "."
            && self.end.checked_sub(self.start) == Some(1)
    }

    /// The inserted sequence with the `"."` sentinel mapped to "deleted".
    pub(crate) fn normalised_inserted(&self) -> &[u8] {
        if self.inserted == "." {
            b""
        } else {
            self.inserted.as_bytes()
        }
    }

    /// The phase tag to store: `-1` marks an unphased call.
    pub(crate) fn stored_phase(&self) -> Result<u32, Error> {
        if self.phase == -1 {
            return Ok(HOMOZYGOUS);
        }
        u32::try_from(self.phase)
            .map_err(|_| Error::parse(format!("invalid phase {}", self.phase)))
    }
}

fn required_token<R: BufRead>(
    tokens: &mut TokenReader<R>,
    field: &'static str,
) -> Result<String, Error> {
    tokens
        .next_token()?
        .ok_or_else(|| Error::parse(format!("missing {field} field")))
}

fn parse_int<T: std::str::FromStr>(token: &str, field: &'static str) -> Result<T, Error> {
    token
        .parse()
        .map_err(|_| Error::parse(format!("invalid {field} {token:?}")))
}

fn read_reference<R: BufRead>(tokens: &mut TokenReader<R>) -> Result<Option<String>, Error> {
    let Some(reference) = tokens.next_token()? else {
        return Ok(None);
    };
    if reference.len() > MAX_REFERENCE_LEN {
        return Err(Error::parse(format!(
            "reference name of {} bytes exceeds {} bytes",
            reference.len(),
            MAX_REFERENCE_LEN
        )));
    }
    Ok(Some(reference))
}

/// Read one coverage record; `None` at end of input.
pub(crate) fn read_coverage_record<R: BufRead>(
    tokens: &mut TokenReader<R>,
) -> Result<Option<CoverageRecord>, Error> {
    let Some(reference) = read_reference(tokens)? else {
        return Ok(None);
    };
    let start = parse_int(&required_token(tokens, "start")?, "start")?;
    let end = parse_int(&required_token(tokens, "end")?, "end")?;
    Ok(Some(CoverageRecord {
        reference,
        start,
        end,
    }))
}

/// Read one variant record; `None` at end of input.
pub(crate) fn read_variant_record<R: BufRead>(
    tokens: &mut TokenReader<R>,
) -> Result<Option<VariantRecord>, Error> {
    let Some(reference) = read_reference(tokens)? else {
        return Ok(None);
    };
    let start = parse_int(&required_token(tokens, "start")?, "start")?;
    let end = parse_int(&required_token(tokens, "end")?, "end")?;
    let phase = parse_int(&required_token(tokens, "phase")?, "phase")?;
    let len: i64 = parse_int(&required_token(tokens, "len")?, "len")?;
    if len > MAX_INSERTED_LEN as i64 {
        return Err(Error::parse(format!(
            "inserted sequence length {len} exceeds {MAX_INSERTED_LEN}"
        )));
    }
    let inserted = required_token(tokens, "inserted")?;
    if inserted.len() > MAX_INSERTED_LEN {
        return Err(Error::parse(format!(
            "inserted sequence of {} bytes exceeds {} bytes",
            inserted.len(),
            MAX_INSERTED_LEN
        )));
    }
    Ok(Some(VariantRecord {
        reference,
        start,
        end,
        phase,
        len,
        inserted,
    }))
}

/// Load covered regions for `sample_id` into the coverage table.
///
/// Returns the number of records loaded.  A parse failure — whether in
/// the input or rejected by the table — stops the load and keeps what was
/// loaded so far; an insert that hits a structural bound retracts the
/// sample from the table and returns the adjusted count; I/O errors
/// propagate.
pub fn coverage_from_file<R: BufRead>(
    reader: R,
    sample_id: u32,
    cov: &mut CoverageTable,
) -> Result<u64, Error> {
    let mut tokens = TokenReader::new(reader);
    let mut count = 0u64;
    loop {
        let record = match read_coverage_record(&mut tokens) {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(Error::Io(e)) => return Err(e.into()),
            Err(e) => {
                warn!(
                    "stopping coverage load for sample {} at line {}: {}",
                    sample_id,
                    tokens.line_no(),
                    e
                );
                break;
            }
        };
        match cov.insert(
            record.reference.as_bytes(),
            record.start,
            record.end,
            sample_id,
        ) {
            Ok(()) => count += 1,
            Err(e @ Error::Parse { .. }) => {
                warn!(
                    "stopping coverage load for sample {} at line {}: {}",
                    sample_id,
                    tokens.line_no(),
                    e
                );
                break;
            }
            Err(Error::Io(e)) => return Err(e.into()),
            Err(e) => {
                warn!(
                    "retracting sample {} after failed coverage insert at line {}: {}",
                    sample_id,
                    tokens.line_no(),
                    e
                );
                let subset = SampleSet::from_ids([sample_id])?;
                let removed = cov.remove(&subset);
                return Ok(count.saturating_sub(removed));
            }
        }
    }
    Ok(count)
}

/// Load variant calls for `sample_id`, splitting them over the SNV and MNV
/// tables; MNV inserted sequences are interned in the sequence dictionary.
///
/// Same stop and retraction policy as [`coverage_from_file`]; a failed
/// insert retracts the sample from both variant tables.
pub fn variants_from_file<R: BufRead>(
    reader: R,
    sample_id: u32,
    snv: &mut SnvTable,
    mnv: &mut MnvTable,
    seq: &mut SequenceTable,
) -> Result<u64, Error> {
    let mut tokens = TokenReader::new(reader);
    let mut count = 0u64;
    loop {
        let record = match read_variant_record(&mut tokens) {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(Error::Io(e)) => return Err(e.into()),
            Err(e) => {
                warn!(
                    "stopping variant load for sample {} at line {}: {}",
                    sample_id,
                    tokens.line_no(),
                    e
                );
                break;
            }
        };

        let insert_result = (|| -> Result<(), Error> {
            let phase = record.stored_phase()?;
            if record.is_snv() {
                let base = Base::from_ascii(record.inserted.as_bytes()[0]).ok_or_else(|| {
                    Error::parse(format!("invalid IUPAC base {:?}", record.inserted))
                })?;
                snv.insert(
                    record.reference.as_bytes(),
                    record.start,
                    sample_id,
                    phase,
                    base,
                )
            } else {
                let handle = seq.insert(record.normalised_inserted())?;
                mnv.insert(
                    record.reference.as_bytes(),
                    record.start,
                    record.end,
                    sample_id,
                    phase,
                    handle,
                )
            }
        })();

        match insert_result {
            Ok(()) => count += 1,
            Err(e @ Error::Parse { .. }) => {
                warn!(
                    "stopping variant load for sample {} at line {}: {}",
                    sample_id,
                    tokens.line_no(),
                    e
                );
                break;
            }
            Err(Error::Io(e)) => return Err(e.into()),
            Err(e) => {
                warn!(
                    "retracting sample {} after failed variant insert at line {}: {}",
                    sample_id,
                    tokens.line_no(),
                    e
                );
                let subset = SampleSet::from_ids([sample_id])?;
                let removed = snv.remove(&subset).saturating_add(mnv.remove(&subset));
                return Ok(count.saturating_sub(removed));
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::{coverage_from_file, variants_from_file, TokenReader};
    use crate::store::error::Error;
    use crate::store::iupac::Base;
    use crate::store::sample_set::SampleSet;
    use crate::store::seq::SequenceTable;
    use crate::store::table::{CoverageTable, MnvTable, SnvTable};

    fn variant_tables() -> (SnvTable, MnvTable, SequenceTable) {
        (
            SnvTable::new(16, 1 << 10, 1 << 10).unwrap(),
            MnvTable::new(16, 1 << 10, 1 << 10).unwrap(),
            SequenceTable::new(1 << 10).unwrap(),
        )
    }

    #[test]
    fn tokens_ignore_line_structure() -> Result<(), Error> {
        let mut tokens = TokenReader::new(Cursor::new("chr1 10\n\n  20\nchr2\t0 5\n"));

        let mut seen = Vec::new();
        while let Some(token) = tokens.next_token()? {
            seen.push(token);
        }
        assert_eq!(seen, vec!["chr1", "10", "20", "chr2", "0", "5"]);
        assert_eq!(tokens.line_no(), 4);

        Ok(())
    }

    #[test]
    fn coverage_load_counts_records() -> Result<(), Error> {
        let mut cov = CoverageTable::new(16, 1 << 10, 1 << 10)?;
        let input = "chr1 10 20\nchr1 30 40\nchr2 0 100\n";

        let count = coverage_from_file(Cursor::new(input), 1, &mut cov)?;

        assert_eq!(count, 3);
        assert_eq!(cov.reference_count(), 2);
        assert_eq!(cov.query_stab(b"chr1", 15, 16, None), 1);
        assert_eq!(cov.query_stab(b"chr2", 50, 51, None), 1);

        Ok(())
    }

    #[test]
    fn coverage_load_stops_at_parse_failure() -> Result<(), Error> {
        let mut cov = CoverageTable::new(16, 1 << 10, 1 << 10)?;
        let input = "chr1 10 20\nchr1 x 40\nchr1 50 60\n";

        let count = coverage_from_file(Cursor::new(input), 1, &mut cov)?;

        // The record before the bad token stays loaded.
        assert_eq!(count, 1);
        assert_eq!(cov.query_stab(b"chr1", 0, 100, None), 1);

        Ok(())
    }

    #[test]
    fn inverted_interval_stops_without_retraction() -> Result<(), Error> {
        let mut cov = CoverageTable::new(16, 1 << 10, 1 << 10)?;
        let input = "chr1 10 20\nchr1 30 25\nchr1 40 50\n";

        let count = coverage_from_file(Cursor::new(input), 1, &mut cov)?;

        assert_eq!(count, 1);
        assert_eq!(cov.query_stab(b"chr1", 0, 100, None), 1);

        Ok(())
    }

    #[test]
    fn coverage_load_retracts_sample_on_failed_insert() -> Result<(), Error> {
        let mut cov = CoverageTable::new(1, 1 << 10, 1 << 10)?;
        let input = "chr1 0 10\nchr1 5 15\nchr2 0 10\nchr1 20 30\n";

        let count = coverage_from_file(Cursor::new(input), 5, &mut cov)?;

        assert_eq!(count, 0);
        assert_eq!(cov.query_stab(b"chr1", 0, 100, None), 0);

        Ok(())
    }

    #[test]
    fn retraction_spares_other_samples() -> Result<(), Error> {
        let mut cov = CoverageTable::new(1, 1 << 10, 1 << 10)?;
        assert_eq!(
            coverage_from_file(Cursor::new("chr1 0 100\n"), 1, &mut cov)?,
            1
        );

        let count = coverage_from_file(Cursor::new("chr1 0 10\nchr2 0 10\n"), 5, &mut cov)?;

        assert_eq!(count, 0);
        assert_eq!(cov.query_stab(b"chr1", 0, 100, None), 1);

        Ok(())
    }

    #[test]
    fn variants_split_between_snv_and_mnv() -> Result<(), Error> {
        let (mut snv, mut mnv, mut seq) = variant_tables();
        let input = "chr1 15 16 0 1 A\nchr1 100 103 -1 3 GTA\nchr1 200 203 2 0 .\n";

        let count = variants_from_file(Cursor::new(input), 7, &mut snv, &mut mnv, &mut seq)?;

        assert_eq!(count, 3);
        let a = Base::from_ascii(b'A').unwrap();
        assert_eq!(snv.query(b"chr1", 15, a, None), 1);

        let gta = seq.find(b"GTA").expect("GTA interned");
        assert_eq!(mnv.query(b"chr1", 100, 103, gta, None), 1);

        // The "." sentinel interns the empty sequence.
        let deletion = seq.find(b"").expect("empty sequence interned");
        assert_eq!(mnv.query(b"chr1", 200, 203, deletion, None), 1);

        Ok(())
    }

    #[test]
    fn oversized_len_stops_the_load() -> Result<(), Error> {
        let (mut snv, mut mnv, mut seq) = variant_tables();
        let input = "chr1 15 16 0 1 A\nchr1 0 2000 0 2000 GTA\nchr1 17 18 0 1 C\n";

        let count = variants_from_file(Cursor::new(input), 7, &mut snv, &mut mnv, &mut seq)?;

        assert_eq!(count, 1);
        let a = Base::from_ascii(b'A').unwrap();
        assert_eq!(snv.query(b"chr1", 15, a, None), 1);

        Ok(())
    }

    #[test]
    fn variant_load_retracts_sample_on_failed_insert() -> Result<(), Error> {
        let mut snv = SnvTable::new(16, 1 << 10, 1 << 10)?;
        let mut mnv = MnvTable::new(1, 1 << 10, 1 << 10)?;
        let mut seq = SequenceTable::new(1 << 10)?;
        let input = "chr1 15 16 0 1 A\nchr1 100 103 0 3 GTA\nchr2 100 103 0 3 GTA\n";

        let count = variants_from_file(Cursor::new(input), 7, &mut snv, &mut mnv, &mut seq)?;

        // Both tables are swept: two loaded records minus two retracted.
        assert_eq!(count, 0);
        let subset = SampleSet::from_ids([7])?;
        assert_eq!(snv.remove(&subset), 0);
        assert_eq!(mnv.remove(&subset), 0);

        Ok(())
    }

    #[test]
    fn negative_phase_other_than_minus_one_stops_the_load() -> Result<(), Error> {
        let (mut snv, mut mnv, mut seq) = variant_tables();
        let input = "chr1 15 16 -3 1 A\n";

        let count = variants_from_file(Cursor::new(input), 7, &mut snv, &mut mnv, &mut seq)?;

        assert_eq!(count, 0);
        assert_eq!(snv.entry_count(), 0);

        Ok(())
    }
}
