//! Annotation of candidate variants with population frequency counts.

use std::io::{BufRead, Write};

use clap::Parser;
use tracing::{debug, info, warn};

use crate::{
    common::{
        self,
        io::{open_read_maybe_gz, open_write_maybe_gz},
    },
    ingest::{self, read_variant_record, TokenReader},
    store::{
        error::Error,
        iupac::Base,
        sample_set::SampleSet,
        seq::SequenceTable,
        table::{CoverageTable, MnvTable, SnvTable},
    },
};

/// Annotate each candidate record with `num:den`.
///
/// `num` counts matching variant observations (SNV or MNV split as on
/// ingestion), `den` counts covered chromosomal copies (two per covering
/// sample).  Input records are echoed byte-for-byte with the counts in a
/// trailing tab-separated column.  Returns the number of records written.
pub fn annotate_from_file<W: Write, R: BufRead>(
    writer: &mut W,
    reader: R,
    cov: &CoverageTable,
    snv: &SnvTable,
    mnv: &MnvTable,
    seq: &SequenceTable,
    subset: Option<&SampleSet>,
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
                    "stopping annotation at line {}: {}",
                    tokens.line_no(),
                    e
                );
                break;
            }
        };

        let num = if record.is_snv() {
            match Base::from_ascii(record.inserted.as_bytes()[0]) {
                Some(base) => snv.query(record.reference.as_bytes(), record.start, base, subset),
                None => {
                    warn!(
                        "stopping annotation at line {}: invalid IUPAC base {:?}",
                        tokens.line_no(),
                        record.inserted
                    );
                    break;
                }
            }
        } else {
            match seq.find(record.normalised_inserted()) {
                Some(handle) => mnv.query(
                    record.reference.as_bytes(),
                    record.start,
                    record.end,
                    handle,
                    subset,
                ),
                None => 0,
            }
        };

        let den = cov
            .query_stab(record.reference.as_bytes(), record.start, record.end, subset)
            .saturating_mul(2);

        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}:{}",
            record.reference, record.start, record.end, record.phase, record.len,
            record.inserted, num, den
        )?;
        count += 1;
    }
    Ok(count)
}

/// Pairing of a sample identifier with an input file, given as `SAMPLE=PATH`.
#[derive(Debug, Clone)]
pub struct SamplePath {
    /// Identifier of the sample the file belongs to.
    pub sample_id: u32,
    /// Path of the file to load.
    pub path: String,
}

impl std::str::FromStr for SamplePath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sample_id, path) = s
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected SAMPLE=PATH, got {:?}", s))?;
        Ok(SamplePath {
            sample_id: sample_id
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid sample id {:?}: {}", sample_id, e))?,
            path: path.to_string(),
        })
    }
}

/// Command line arguments for `varfreq annotate`.
#[derive(Parser, Debug)]
#[command(about = "Annotate candidate variants with frequency counts", long_about = None)]
pub struct Args {
    /// Path to the file with candidate variant records.
    #[arg(long)]
    pub path_input: String,
    /// Path to the annotated output file.
    #[arg(long)]
    pub path_output: String,
    /// Coverage file to load, as `SAMPLE=PATH`; may be given multiple times.
    #[arg(long = "coverage")]
    pub coverage: Vec<SamplePath>,
    /// Variant file to load, as `SAMPLE=PATH`; may be given multiple times.
    #[arg(long = "variants")]
    pub variants: Vec<SamplePath>,
    /// Restrict counting to these sample identifiers; all samples when absent.
    #[arg(long, value_delimiter = ',')]
    pub samples: Option<Vec<u32>>,
    /// Maximum number of distinct reference names per table.
    #[arg(long, default_value_t = 1024)]
    pub ref_capacity: usize,
    /// Maximum total bytes across reference names per table.
    #[arg(long, default_value_t = 1 << 20)]
    pub ref_char_capacity: usize,
    /// Maximum number of entries per interval tree.
    #[arg(long, default_value_t = 1 << 24)]
    pub tree_capacity: usize,
    /// Maximum total bytes across interned inserted sequences.
    #[arg(long, default_value_t = 1 << 28)]
    pub seq_char_capacity: usize,
    /// Optional path for the reference-name listing of the coverage table.
    #[arg(long)]
    pub path_references: Option<String>,
}

/// Main entry point for the `annotate` command.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    info!("Starting `annotate`");
    info!("  common_args = {:?}", &common_args);
    info!("  args = {:?}", &args);

    let mut cov = CoverageTable::new(
        args.ref_capacity,
        args.ref_char_capacity,
        args.tree_capacity,
    )?;
    let mut snv = SnvTable::new(
        args.ref_capacity,
        args.ref_char_capacity,
        args.tree_capacity,
    )?;
    let mut mnv = MnvTable::new(
        args.ref_capacity,
        args.ref_char_capacity,
        args.tree_capacity,
    )?;
    let mut seq = SequenceTable::new(args.seq_char_capacity)?;

    for entry in &args.coverage {
        let reader = open_read_maybe_gz(&entry.path)?;
        let count = ingest::coverage_from_file(reader, entry.sample_id, &mut cov)?;
        info!(
            "loaded {} coverage records for sample {} from {}",
            count, entry.sample_id, entry.path
        );
    }
    for entry in &args.variants {
        let reader = open_read_maybe_gz(&entry.path)?;
        let count =
            ingest::variants_from_file(reader, entry.sample_id, &mut snv, &mut mnv, &mut seq)?;
        info!(
            "loaded {} variant records for sample {} from {}",
            count, entry.sample_id, entry.path
        );
    }
    debug!(
        "tables hold {} coverage, {} SNV, {} MNV entries over {} references; {} sequences",
        cov.entry_count(),
        snv.entry_count(),
        mnv.entry_count(),
        cov.reference_count(),
        seq.len()
    );

    let subset = args
        .samples
        .as_ref()
        .map(|ids| SampleSet::from_ids(ids.iter().copied()))
        .transpose()?;

    let reader = open_read_maybe_gz(&args.path_input)?;
    let mut writer = open_write_maybe_gz(&args.path_output)?;
    let count = annotate_from_file(
        &mut writer,
        reader,
        &cov,
        &snv,
        &mnv,
        &seq,
        subset.as_ref(),
    )?;
    writer.flush()?;
    info!("annotated {} records", count);

    if let Some(path) = &args.path_references {
        let mut writer = open_write_maybe_gz(path)?;
        cov.write_references(&mut writer)?;
        writer.flush()?;
        debug!("wrote reference listing to {}", path);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::{annotate_from_file, Args, SamplePath};
    use crate::common;
    use crate::ingest::{coverage_from_file, variants_from_file};
    use crate::store::error::Error;
    use crate::store::sample_set::SampleSet;
    use crate::store::seq::SequenceTable;
    use crate::store::table::{CoverageTable, MnvTable, SnvTable};

    struct Fixture {
        cov: CoverageTable,
        snv: SnvTable,
        mnv: MnvTable,
        seq: SequenceTable,
    }

    fn fixture(coverage: &[(u32, &str)], variants: &[(u32, &str)]) -> Fixture {
        let mut fx = Fixture {
            cov: CoverageTable::new(16, 1 << 10, 1 << 10).unwrap(),
            snv: SnvTable::new(16, 1 << 10, 1 << 10).unwrap(),
            mnv: MnvTable::new(16, 1 << 10, 1 << 10).unwrap(),
            seq: SequenceTable::new(1 << 10).unwrap(),
        };
        for (sample_id, text) in coverage {
            coverage_from_file(Cursor::new(text), *sample_id, &mut fx.cov).unwrap();
        }
        for (sample_id, text) in variants {
            variants_from_file(
                Cursor::new(text),
                *sample_id,
                &mut fx.snv,
                &mut fx.mnv,
                &mut fx.seq,
            )
            .unwrap();
        }
        fx
    }

    fn annotate(fx: &Fixture, input: &str, subset: Option<&SampleSet>) -> (u64, String) {
        let mut out = Vec::new();
        let count = annotate_from_file(
            &mut out,
            Cursor::new(input),
            &fx.cov,
            &fx.snv,
            &fx.mnv,
            &fx.seq,
            subset,
        )
        .unwrap();
        (count, String::from_utf8(out).unwrap())
    }

    #[test]
    fn snv_with_coverage() -> Result<(), Error> {
        let fx = fixture(
            &[(1, "chr1 10 20\n"), (2, "chr1 10 20\n")],
            &[(1, "chr1 15 16 0 1 A\n")],
        );
        let subset = SampleSet::from_ids([1, 2])?;

        let (count, out) = annotate(&fx, "chr1 15 16 0 1 A\n", Some(&subset));

        assert_eq!(count, 1);
        assert_eq!(out, "chr1\t15\t16\t0\t1\tA\t1:4\n");

        Ok(())
    }

    #[test]
    fn mnv_via_sequence_dictionary() -> Result<(), Error> {
        let fx = fixture(
            &[(7, "chr1 0 1000\n")],
            &[(7, "chr1 100 103 -1 3 GTA\n")],
        );
        let subset = SampleSet::from_ids([7])?;

        let (_, out) = annotate(&fx, "chr1 100 103 0 3 GTA\n", Some(&subset));

        assert_eq!(out, "chr1\t100\t103\t0\t3\tGTA\t1:2\n");

        Ok(())
    }

    #[test]
    fn mnv_miss_by_sequence() -> Result<(), Error> {
        let fx = fixture(
            &[(7, "chr1 0 1000\n")],
            &[(7, "chr1 100 103 -1 3 GTA\n")],
        );
        let subset = SampleSet::from_ids([7])?;

        // GTC was never interned, so the numerator is 0 while coverage holds.
        let (_, out) = annotate(&fx, "chr1 100 103 0 3 GTC\n", Some(&subset));

        assert_eq!(out, "chr1\t100\t103\t0\t3\tGTC\t0:2\n");

        Ok(())
    }

    #[test]
    fn subset_filters_the_numerator_and_denominator() -> Result<(), Error> {
        let fx = fixture(
            &[(1, "chr1 0 100\n"), (2, "chr1 0 100\n")],
            &[(1, "chr1 50 51 0 1 A\n")],
        );
        let subset = SampleSet::from_ids([2])?;

        let (_, out) = annotate(&fx, "chr1 50 51 0 1 A\n", Some(&subset));

        assert_eq!(out, "chr1\t50\t51\t0\t1\tA\t0:2\n");

        Ok(())
    }

    #[test]
    fn empty_subset_reports_zero_everywhere() -> Result<(), Error> {
        let fx = fixture(
            &[(1, "chr1 0 100\n")],
            &[(1, "chr1 50 51 0 1 A\n")],
        );
        let subset = SampleSet::new(4)?;

        let (_, out) = annotate(&fx, "chr1 50 51 0 1 A\n", Some(&subset));

        assert_eq!(out, "chr1\t50\t51\t0\t1\tA\t0:0\n");

        Ok(())
    }

    #[test]
    fn absent_subset_counts_all_samples() -> Result<(), Error> {
        let fx = fixture(
            &[(1, "chr1 0 100\n"), (2, "chr1 0 100\n"), (3, "chr1 0 100\n")],
            &[(1, "chr1 50 51 0 1 A\n"), (2, "chr1 50 51 0 1 A\n")],
        );

        let (_, out) = annotate(&fx, "chr1 50 51 0 1 A\n", None);

        assert_eq!(out, "chr1\t50\t51\t0\t1\tA\t2:6\n");

        Ok(())
    }

    #[test]
    fn coalesced_observations_report_their_multiplicity() -> Result<(), Error> {
        let fx = fixture(
            &[(1, "chr1 0 100\n")],
            &[(1, "chr1 10 11 0 1 A\nchr1 10 11 0 1 A\nchr1 10 11 0 1 A\n")],
        );
        let subset = SampleSet::from_ids([1])?;

        let (_, out) = annotate(&fx, "chr1 10 11 0 1 A\n", Some(&subset));

        assert_eq!(out, "chr1\t10\t11\t0\t1\tA\t3:2\n");

        Ok(())
    }

    #[test]
    fn deletion_round_trips_the_dot_sentinel() -> Result<(), Error> {
        let fx = fixture(
            &[(1, "chr1 0 100\n")],
            &[(1, "chr1 40 43 0 0 .\n")],
        );

        let (_, out) = annotate(&fx, "chr1 40 43 0 0 .\n", None);

        assert_eq!(out, "chr1\t40\t43\t0\t0\t.\t1:2\n");

        Ok(())
    }

    #[test]
    fn unknown_reference_annotates_as_zero() -> Result<(), Error> {
        let fx = fixture(&[(1, "chr1 0 100\n")], &[]);

        let (count, out) = annotate(&fx, "chr9 10 11 0 1 A\n", None);

        assert_eq!(count, 1);
        assert_eq!(out, "chr9\t10\t11\t0\t1\tA\t0:0\n");

        Ok(())
    }

    #[test]
    fn oversized_len_stops_annotation() -> Result<(), Error> {
        let fx = fixture(&[(1, "chr1 0 100\n")], &[]);

        let (count, out) = annotate(
            &fx,
            "chr1 10 11 0 1 A\nchr1 0 9999 0 9999 GTA\nchr1 10 11 0 1 A\n",
            None,
        );

        assert_eq!(count, 1);
        assert_eq!(out.lines().count(), 1);

        Ok(())
    }

    #[test]
    fn run_annotates_files_end_to_end() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path_cov = tmp_dir.join("cov.varda");
        let path_var = tmp_dir.join("var.varda");
        let path_input = tmp_dir.join("input.varda");
        let path_output = tmp_dir.join("output.varda");
        let path_references = tmp_dir.join("refs.txt");

        std::fs::write(&path_cov, "chr1 10 20\n")?;
        std::fs::write(&path_var, "chr1 15 16 0 1 A\n")?;
        std::fs::write(&path_input, "chr1 15 16 0 1 A\nchr1 15 16 0 1 G\n")?;

        let common_args = common::Args {
            verbose: clap_verbosity_flag::Verbosity::new(0, 0),
        };
        let args = Args {
            path_input: path_input.to_str().unwrap().to_string(),
            path_output: path_output.to_str().unwrap().to_string(),
            coverage: vec![SamplePath {
                sample_id: 1,
                path: path_cov.to_str().unwrap().to_string(),
            }],
            variants: vec![SamplePath {
                sample_id: 1,
                path: path_var.to_str().unwrap().to_string(),
            }],
            samples: Some(vec![1]),
            ref_capacity: 16,
            ref_char_capacity: 1 << 10,
            tree_capacity: 1 << 10,
            seq_char_capacity: 1 << 10,
            path_references: Some(path_references.to_str().unwrap().to_string()),
        };

        super::run(&common_args, &args)?;

        assert_eq!(
            std::fs::read_to_string(&path_output)?,
            "chr1\t15\t16\t0\t1\tA\t1:2\nchr1\t15\t16\t0\t1\tG\t0:2\n"
        );
        assert_eq!(std::fs::read_to_string(&path_references)?, "4\tchr1\n");

        Ok(())
    }
}
