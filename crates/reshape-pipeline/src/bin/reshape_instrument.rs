use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use reshape_dxil::DxilContainer;
use reshape_il::{pretty, InstrumentationConfig};
use reshape_pipeline::{InstrumentOutcome, PassthroughReason, ShaderFormat, ShaderInstrumenter};
use reshape_spirv::SpvModule;
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "\
reshape-instrument: instrument a SPIR-V module or DXIL container

USAGE:
    reshape-instrument <input> [--features NAME[,NAME...]] [--out PATH] [--dump]

FLAGS:
    --features LIST   Comma-separated features to enable (`bounds` or `resource-bounds`)
    --detailed        Export extended records where features support them
    --safe-guarded    Skip unsupported sites instead of failing the shader
    --guid N          Shader GUID reported in source locations (default 1)
    --out PATH        Write the resulting binary to PATH
    --dump            Print the resulting program in textual form
"
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = real_main() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn feature_name(alias: &str) -> &str {
    match alias {
        "bounds" => reshape_features::resource_bounds::NAME,
        other => other,
    }
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    match args.next() {
        Some(value) => Ok(value),
        None => bail!("{flag} requires a value"),
    }
}

fn real_main() -> anyhow::Result<()> {
    let mut input: Option<PathBuf> = None;
    let mut out: Option<PathBuf> = None;
    let mut features: Vec<String> = Vec::new();
    let mut detailed = false;
    let mut safe_guarded = false;
    let mut guid = 1u64;
    let mut dump = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print!("{}", usage());
                return Ok(());
            }
            "--features" => {
                let list = next_value(&mut args, "--features")?;
                features.extend(list.split(',').map(str::trim).map(str::to_owned));
            }
            "--out" => out = Some(PathBuf::from(next_value(&mut args, "--out")?)),
            "--guid" => {
                let v = next_value(&mut args, "--guid")?;
                guid = v
                    .parse::<u64>()
                    .with_context(|| format!("invalid --guid value {v:?}"))?;
            }
            "--detailed" => detailed = true,
            "--safe-guarded" => safe_guarded = true,
            "--dump" => dump = true,
            _ if arg.starts_with('-') => {
                bail!("unknown option {arg:?}\n\n{}", usage());
            }
            _ => {
                if input.is_some() {
                    bail!("unexpected positional argument {arg:?}\n\n{}", usage());
                }
                input = Some(PathBuf::from(arg));
            }
        }
    }

    let Some(input) = input else {
        bail!("missing input path\n\n{}", usage());
    };
    let bytes = fs::read(&input).with_context(|| format!("failed to read {}", input.display()))?;
    let format = ShaderFormat::detect(&bytes)
        .with_context(|| format!("{} is neither SPIR-V nor DXBC", input.display()))?;

    let instrumenter =
        ShaderInstrumenter::new().context("failed to install instrumentation features")?;
    for name in &features {
        if instrumenter.registry().bit_of(feature_name(name)).is_none() {
            bail!("unknown feature {name:?}");
        }
    }
    let config = InstrumentationConfig {
        detailed,
        safe_guarded,
        ..instrumenter.config_for(features.iter().map(|name| feature_name(name)))
    };

    let outcome = instrumenter.instrument(&bytes, guid, &config);
    match &outcome {
        InstrumentOutcome::Instrumented(out) => {
            eprintln!(
                "{}: instrumented {format:?} shader ({} -> {} bytes, {} source locations)",
                input.display(),
                bytes.len(),
                out.len(),
                instrumenter.locations().len()
            );
        }
        InstrumentOutcome::Passthrough {
            reason: PassthroughReason::Unchanged,
        } => eprintln!("{}: unchanged", input.display()),
        InstrumentOutcome::Passthrough {
            reason: PassthroughReason::Failed(err),
        } => eprintln!("{}: passed through: {err}", input.display()),
    }
    let result = outcome.into_bytes(&bytes);

    if dump {
        let text = match format {
            ShaderFormat::Spirv => {
                let module =
                    SpvModule::parse(&result, guid).context("failed to decode the result")?;
                pretty::print_program(module.program())
            }
            ShaderFormat::Dxbc => {
                let container =
                    DxilContainer::parse(&result, guid).context("failed to decode the result")?;
                pretty::print_program(container.program())
            }
        };
        print!("{text}");
    }

    if let Some(path) = out {
        fs::write(&path, &result).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
