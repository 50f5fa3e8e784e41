//! Command lines for the conversion, basecalling, alignment and lookup tools

use std::path::{Path, PathBuf};

use crate::config::OutputLayout;

/// Builds tool invocations for one run
#[derive(Debug, Clone)]
pub struct ToolCommands {
    layout: OutputLayout,
    model: PathBuf,
    reference_fasta: PathBuf,
    tandem_repeat_bed: PathBuf,
}

impl ToolCommands {
    pub fn new(
        layout: OutputLayout,
        model: PathBuf,
        reference_fasta: PathBuf,
        tandem_repeat_bed: PathBuf,
    ) -> Self {
        Self {
            layout,
            model,
            reference_fasta,
            tandem_repeat_bed,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Short model name used in output file names.
    pub fn model_name(&self) -> String {
        self.model
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.model.to_string_lossy().to_string())
    }

    pub fn pod5_dir(&self, sample: &str) -> PathBuf {
        self.layout.pod5_dir.join(sample)
    }

    pub fn ubam_path(&self, sample: &str, variant: &str) -> PathBuf {
        self.layout
            .ubam_dir
            .join(sample)
            .join(format!("{}_{}.ubam", sample, variant_tag(variant)))
    }

    pub fn bam_path(&self, sample: &str, variant: &str) -> PathBuf {
        self.layout
            .bam_dir
            .join(sample)
            .join(format!("{}_{}.bam", sample, variant_tag(variant)))
    }

    fn lookup_prefix(&self, sample: &str, variant: &str) -> PathBuf {
        self.layout.other_dir.join(sample).join(format!(
            "{}_{}_{}",
            sample,
            variant_tag(variant),
            self.model_name()
        ))
    }

    pub fn convert(&self, sample: &str, index: usize, group: &Path, threads: u32) -> String {
        let out_dir = self.pod5_dir(sample);
        format!(
            "mkdir -p {out} && pod5 convert fast5 {group}/*.fast5 --output {out}/{sample}_{index}.pod5 --threads {threads}",
            out = out_dir.display(),
            group = group.display(),
        )
    }

    pub fn basecall(&self, sample: &str, variant: &str, device: &str) -> String {
        let ubam = self.ubam_path(sample, variant);
        format!(
            "mkdir -p {ubam_dir} && dorado basecaller {model} {pod5}/ --modified-bases {variant} --device {device} > {ubam}",
            ubam_dir = parent_display(&ubam),
            model = self.model.display(),
            pod5 = self.pod5_dir(sample).display(),
            ubam = ubam.display(),
        )
    }

    pub fn align(&self, sample: &str, variant: &str, threads: u32) -> String {
        let ubam = self.ubam_path(sample, variant);
        let bam = self.bam_path(sample, variant);
        format!(
            "mkdir -p {bam_dir} && dorado aligner --threads {threads} {reference} {ubam} | samtools sort -@ {threads} -o {bam} - && samtools index {bam}",
            bam_dir = parent_display(&bam),
            reference = self.reference_fasta.display(),
            ubam = ubam.display(),
            bam = bam.display(),
        )
    }

    pub fn mod_lookup(&self, sample: &str, variant: &str, threads: u32) -> String {
        let prefix = self.lookup_prefix(sample, variant);
        format!(
            "mkdir -p {out_dir} && modkit pileup {bam} {prefix}.bed --ref {reference} --threads {threads}",
            out_dir = parent_display(&prefix),
            bam = self.bam_path(sample, variant).display(),
            prefix = prefix.display(),
            reference = self.reference_fasta.display(),
        )
    }

    pub fn sv_lookup(&self, sample: &str, variant: &str, threads: u32) -> String {
        let prefix = self.lookup_prefix(sample, variant);
        format!(
            "mkdir -p {out_dir} && sniffles --input {bam} --vcf {prefix}.sv.vcf.gz --reference {reference} --tandem-repeats {bed} --threads {threads}",
            out_dir = parent_display(&prefix),
            bam = self.bam_path(sample, variant).display(),
            prefix = prefix.display(),
            reference = self.reference_fasta.display(),
            bed = self.tandem_repeat_bed.display(),
        )
    }
}

/// File-name form of a variant (`5mCG_5hmCG` -> `5mCG-5hmCG`).
pub fn variant_tag(variant: &str) -> String {
    variant.replace('_', "-")
}

fn parent_display(path: &Path) -> String {
    path.parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}
