use std::{collections::BTreeMap, io::Write};

use anyhow::Context;
use compress_io::compress::CompressIo;
use serde::Serialize;
use serde_yaml::Value;

use crate::{
    config::{Config, OutputFormat},
    pipeline::{MetadataConfig, PipelineConfig, RefConfig, VarcallConfig},
    populate::{populate_metadata, PopulatedMetadata, GENERATED_KEYS},
    sampleset::SetFileStore,
};

/// The input configuration without any keys that are generated by the populator.
/// Generated keys from an earlier run are replaced, not repeated.
#[derive(Serialize)]
struct InputConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a MetadataConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refs: Option<&'a BTreeMap<String, RefConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    varcall: Option<&'a VarcallConfig>,
    #[serde(flatten)]
    other: BTreeMap<&'a str, &'a Value>,
}

impl<'a> InputConfig<'a> {
    fn new(pipeline: &'a PipelineConfig) -> Self {
        let other = pipeline
            .other
            .iter()
            .filter(|(k, _)| {
                let generated = GENERATED_KEYS.contains(&k.as_str());
                if generated {
                    debug!("Replacing {} from input configuration", k)
                }
                !generated
            })
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        Self {
            metadata: pipeline.metadata.as_ref(),
            refs: pipeline.refs.as_ref(),
            varcall: pipeline.varcall.as_ref(),
            other,
        }
    }
}

/// The input configuration with the generated metadata merged in
#[derive(Serialize)]
struct PopulatedConfig<'a> {
    #[serde(flatten)]
    input: InputConfig<'a>,
    #[serde(flatten)]
    metadata: &'a PopulatedMetadata,
}

fn write_config<W: Write>(
    wrt: &mut W,
    pipeline: &PipelineConfig,
    metadata: &PopulatedMetadata,
    fmt: OutputFormat,
) -> anyhow::Result<()> {
    let out = PopulatedConfig {
        input: InputConfig::new(pipeline),
        metadata,
    };
    match fmt {
        OutputFormat::Yaml => serde_yaml::to_writer(&mut *wrt, &out)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *wrt, &out)?;
            writeln!(wrt)?
        }
    }
    Ok(())
}

/// Strategy
///
/// Populate metadata using the sample set directory in the project directory,
/// then write out the input configuration with the generated keys added
pub fn process_config(cfg: &Config) -> anyhow::Result<()> {
    debug!("Starting processing");

    let mut store = SetFileStore::for_project(cfg.project_dir());
    debug!("Sample sets stored in {}", store.dir().display());
    let metadata = populate_metadata(
        cfg.pipeline(),
        cfg.paths(),
        cfg.project_dir(),
        &mut store,
    )?;
    info!(
        "Populated metadata from {}: {} samples, {} sample sets, {} references, {} variant callers",
        metadata.paths().runlib2samp.display(),
        metadata.runlib().samp2runlib().len(),
        metadata.samplesets().sets().len(),
        metadata.chroms().len(),
        metadata.varcall_regions().map(|r| r.len()).unwrap_or(0)
    );

    let mut wrt = CompressIo::new()
        .opt_path(cfg.output_file())
        .bufwriter()
        .with_context(|| "Failed to open output file")?;

    write_config(&mut wrt, cfg.pipeline(), &metadata, cfg.output_format())
        .with_context(|| "Error writing populated configuration")?;
    wrt.flush()
        .with_context(|| "Error writing populated configuration")?;

    debug!("Finished processing");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fai::fai_path, populate::MetadataPaths};
    use std::fs;

    #[test]
    fn populated_config_keeps_input_keys() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        fs::write(p.join("run2lib.csv"), "run,library,sample\nR1,L1,S1\n").unwrap();
        fs::write(p.join("samples.csv"), "sample\nS1\n").unwrap();
        fs::create_dir(p.join("sets")).unwrap();
        fs::write(p.join("sets/all.txt"), "S1\n").unwrap();
        fs::write(fai_path(p.join("g.fa")), "chr1\t2500\t6\t60\t61\n").unwrap();
        let yaml = format!(
            "metadata:\n  runlib2samp_file: {0}/run2lib.csv\n  sample_meta_file: {0}/samples.csv\n  \
             setfile_glob: {0}/sets/*.txt\nrefs:\n  g:\n    fasta: {0}/g.fa\n\
             varcall:\n  chunksize:\n    bcftools: 1000\nmapping:\n  ngm: true\n",
            p.display()
        );
        fs::write(p.join("config.yml"), &yaml).unwrap();

        let mut cfg = Config::new(
            PipelineConfig::from_path(p.join("config.yml")).unwrap(),
            MetadataPaths::default(),
        );
        cfg.set_project_dir(p);
        cfg.set_output_file(p.join("out.json"));
        process_config(&cfg).unwrap();

        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(p.join("out.json")).unwrap()).unwrap();
        assert_eq!(v["mapping"]["ngm"], true);
        assert_eq!(v["refs"]["g"]["fasta"], format!("{}/g.fa", p.display()));
        assert_eq!(v["varcall"]["chunksize"]["bcftools"], 1000);
        assert_eq!(v["SAMPLESETS"]["all_samples"][0], "S1");
        assert_eq!(
            v["VARCALL_REGIONS"]["bcftools"]["g"][2],
            "chr1:000002001-000002500"
        );
        assert!(p.join("data/samplesets/all.txt").exists());
    }

    #[test]
    fn yaml_output() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        fs::write(p.join("run2lib.csv"), "run,library,sample\nR1,L1,S1\n").unwrap();
        fs::write(fai_path(p.join("g.fa")), "chr1\t10\t6\t60\t61\n").unwrap();
        let pipeline = PipelineConfig::from_yaml_str(&format!(
            "refs:\n  g:\n    fasta: {0}/g.fa\nthreads: 4\n",
            p.display()
        ))
        .unwrap();
        let paths = MetadataPaths {
            runlib2samp: Some(p.join("run2lib.csv")),
            sample_meta: Some(p.join("run2lib.csv")),
            setfile_glob: Some(format!("{}/sets/*.txt", p.display())),
        };
        let mut store = SetFileStore::for_project(p);
        let md = populate_metadata(&pipeline, &paths, p, &mut store).unwrap();
        let mut buf = Vec::new();
        write_config(&mut buf, &pipeline, &md, OutputFormat::Yaml).unwrap();
        let v: serde_yaml::Value = serde_yaml::from_slice(&buf).unwrap();
        assert_eq!(v["threads"].as_u64(), Some(4));
        assert_eq!(v["CHROMS"]["g"]["chr1"].as_u64(), Some(10));
        assert_eq!(v["RUNLIB2SAMP"][0]["run"].as_str(), Some("R1"));
        assert!(v.get("VARCALL_REGIONS").is_none());
    }

    #[test]
    fn generated_keys_replace_stale_values() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        fs::write(p.join("run2lib.csv"), "run,library,sample\nR1,L1,S1\n").unwrap();
        fs::create_dir(p.join("sets")).unwrap();
        fs::write(p.join("sets/groupA.txt"), "S1\n").unwrap();
        fs::write(fai_path(p.join("g.fa")), "chr1\t10\t6\t60\t61\n").unwrap();
        let pipeline = PipelineConfig::from_yaml_str(
            "metadata:\n  runlib2samp_file: run2lib.csv\n  sample_meta_file: run2lib.csv\n  \
             setfile_glob: sets/*.txt\nrefs:\n  g:\n    fasta: g.fa\nthreads: 4\n\
             SAMPLESETS:\n  stale: [x]\nCHROMS:\n  old: {chrZ: 5}\n\
             VARCALL_REGIONS:\n  gatk: {g: [\"chrZ:1-5\"]}\n",
        )
        .unwrap();
        let mut store = SetFileStore::for_project(p);
        let md = populate_metadata(&pipeline, &MetadataPaths::default(), p, &mut store).unwrap();

        let mut buf = Vec::new();
        write_config(&mut buf, &pipeline, &md, OutputFormat::Yaml).unwrap();
        let v: serde_yaml::Value = serde_yaml::from_slice(&buf).unwrap();
        let sets = v["SAMPLESETS"].as_mapping().unwrap();
        assert_eq!(sets.len(), 2);
        assert!(v["SAMPLESETS"].get("stale").is_none());
        assert_eq!(v["SAMPLESETS"]["groupA"][0].as_str(), Some("S1"));
        assert!(v["CHROMS"].get("old").is_none());
        assert_eq!(v["CHROMS"]["g"]["chr1"].as_u64(), Some(10));
        assert!(v.get("VARCALL_REGIONS").is_none());
        assert_eq!(v["threads"].as_u64(), Some(4));

        // Running again on the populated output gives the same result
        let again = PipelineConfig::from_yaml_str(std::str::from_utf8(&buf).unwrap()).unwrap();
        let mut buf2 = Vec::new();
        write_config(&mut buf2, &again, &md, OutputFormat::Json).unwrap();
        let w: serde_json::Value = serde_json::from_slice(&buf2).unwrap();
        assert_eq!(w["SAMPLESETS"].as_object().unwrap().len(), 2);
        assert_eq!(w["RUNLIB2SAMP"].as_array().unwrap().len(), 1);
    }
}
