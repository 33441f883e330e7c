//! Classification of raw variant submissions.
//!
//! A submission is one of:
//! - a VCF document (recognised by its `#CHROM` header line)
//! - a SeqPilot export or plain HGVSc lines (`NM_000059.3:c.2378A>T`)
//! - genomic shorthand, one variant per line (`13-32532632-A-G (het)`),
//!   rewritten into a minimal single-sample VCF

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::error::{EngineError, Result};

static RE_VCF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO").unwrap());

static RE_SEQPILOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*Transcript.*\tc\. HGVS|.*c\. HGVS.*\tTranscript)").unwrap());

static RE_HGVSC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.+:c\..+").unwrap());

static RE_GENOMIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<chrom>\d+|MT|X|Y)-(?P<pos>\d+)-(?P<ref>[^-]+)-(?P<alt>\S+)(\s+\((?P<gt>.+)?\))?").unwrap()
});

const GENOMIC_VCF_HEADER: &str =
    "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE";

/// Flavour of input handed to the annotation entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Vcf,
    Hgvsc,
}

impl InputKind {
    /// Flag passed to the annotation entry point
    pub fn flag(&self) -> &'static str {
        match self {
            InputKind::Vcf => "--vcf",
            InputKind::Hgvsc => "--hgvsc",
        }
    }

    /// File name of the persisted input inside the task directory
    pub fn file_name(&self) -> &'static str {
        match self {
            InputKind::Vcf => "input.vcf",
            InputKind::Hgvsc => "input.txt",
        }
    }
}

/// Input payload of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskInput {
    /// VCF content
    Vcf(String),
    /// Existing VCF file, linked into the task directory
    VcfFile(PathBuf),
    /// HGVSc transcript notation, one variant per line
    Hgvsc(String),
}

impl TaskInput {
    pub fn kind(&self) -> InputKind {
        match self {
            TaskInput::Vcf(_) | TaskInput::VcfFile(_) => InputKind::Vcf,
            TaskInput::Hgvsc(_) => InputKind::Hgvsc,
        }
    }

    /// Classify raw text, converting genomic shorthand to VCF.
    pub fn detect(raw: &str) -> Result<Self> {
        let data = raw.trim();

        if RE_VCF.is_match(data) {
            return Ok(TaskInput::Vcf(data.to_string()));
        }

        let header = data.lines().find(|l| !l.is_empty()).unwrap_or_default();
        if RE_SEQPILOT.is_match(header) {
            return Ok(TaskInput::Hgvsc(data.to_string()));
        }

        let failing_genomic = first_mismatch(data, &RE_GENOMIC);
        if failing_genomic.is_none() {
            return Ok(TaskInput::Vcf(genomic_to_vcf(data)));
        }

        let failing_hgvsc = first_mismatch(data, &RE_HGVSC);
        if failing_hgvsc.is_none() {
            return Ok(TaskInput::Hgvsc(data.to_string()));
        }

        let (genomic, hgvsc) = (failing_genomic.unwrap_or_default(), failing_hgvsc.unwrap_or_default());
        if genomic == hgvsc {
            Err(EngineError::Validation(format!(
                "Unable to determine input type (vcf, seqpilot, genomic, or hgvsc). Not genomic or hgvsc: {}",
                genomic
            )))
        } else {
            Err(EngineError::Validation(format!(
                "Unable to determine input type (vcf, seqpilot, genomic, or hgvsc). Not genomic: {}. Not hgvsc: {}",
                genomic, hgvsc
            )))
        }
    }
}

fn first_mismatch<'a>(data: &'a str, re: &Regex) -> Option<&'a str> {
    data.split('\n').find(|l| !re.is_match(l))
}

/// Rewrite `CHROM-POS-REF-ALT (gt)` lines as a single-sample VCF.
fn genomic_to_vcf(data: &str) -> String {
    let mut vcf = GENOMIC_VCF_HEADER.to_string();
    for line in data.split('\n') {
        let Some(caps) = RE_GENOMIC.captures(line) else {
            continue;
        };
        let gt = caps.name("gt").map(|m| m.as_str());
        let format = if gt.is_some() { "GT" } else { "." };
        let sample = match gt {
            Some("het") => "0/1",
            Some("homo") | Some("hom") => "1/1",
            _ => ".",
        };
        vcf.push_str(&format!(
            "\n{}\t{}\t.\t{}\t{}\t.\tPASS\t.\t{}\t{}",
            &caps["chrom"], &caps["pos"], &caps["ref"], &caps["alt"], format, sample
        ));
    }
    vcf
}
