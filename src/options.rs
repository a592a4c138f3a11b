//! Run configuration and its command line.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::bindings::BindingSizes;
use crate::program::ShaderLanguage;

/// The first render node, present on any Linux machine with a DRM driver.
pub const DEFAULT_DEVICE: &str = "/dev/dri/renderD128";
/// Default size of every buffer, 1 KiB.
pub const DEFAULT_BUFFER_DWORDS: u32 = 256;
/// Resource dumped when `--dump` is not given.
pub const DEFAULT_DUMP: &str = "Output";

/// Number of work groups dispatched along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroups {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Default for WorkGroups {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl WorkGroups {
    pub fn as_array(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

impl fmt::Display for WorkGroups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

impl FromStr for WorkGroups {
    type Err = UsageError;

    /// Exactly three comma-separated unsigned integers, `X,Y,Z`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || UsageError::Groups(s.to_string());
        let parts = s
            .split(',')
            .map(|part| part.trim().parse::<u32>().map_err(|_| bad()))
            .collect::<Result<Vec<_>, _>>()?;
        match parts[..] {
            [x, y, z] => Ok(Self { x, y, z }),
            _ => Err(bad()),
        }
    }
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Render node to open.
    pub device: PathBuf,
    /// Work groups to dispatch, `-G X,Y,Z`.
    pub groups: WorkGroups,
    /// Size of storage and uniform buffers, in dwords.
    pub buffer_dwords: u32,
    /// Shader source file.
    pub shader: PathBuf,
    /// Resources to read back and dump after the dispatch.
    pub dump: Vec<String>,
    /// Compute entry point; the first one when unset.
    pub entry: Option<String>,
    /// Forced shader language; otherwise taken from the file extension.
    pub language: Option<ShaderLanguage>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            groups: WorkGroups::default(),
            buffer_dwords: DEFAULT_BUFFER_DWORDS,
            shader: PathBuf::new(),
            dump: vec![DEFAULT_DUMP.to_string()],
            entry: None,
            language: None,
        }
    }
}

impl Options {
    /// The forced language, or the one implied by the shader's extension.
    pub fn language(&self) -> ShaderLanguage {
        self.language
            .unwrap_or_else(|| ShaderLanguage::from_path(&self.shader))
    }

    pub fn binding_sizes(&self) -> BindingSizes {
        BindingSizes {
            buffer_dwords: self.buffer_dwords,
            ..BindingSizes::default()
        }
    }
}

/// A command line that cannot be run.
///
/// The binary prints the message followed by the usage text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("expected exactly one shader file")]
    Shader,
    #[error("invalid group count `{0}`, expected X,Y,Z")]
    Groups(String),
    #[error("invalid size `{0}`, expected a positive number of dwords")]
    Size(String),
    #[error("{0}")]
    Language(String),
    #[error("option `{0}` requires a value")]
    MissingValue(String),
    #[error("unknown option `{0}`")]
    UnknownOption(String),
}

/// What the command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(Options),
    Help,
}

#[derive(Clone, Copy)]
enum Flag {
    Device,
    Groups,
    Size,
    Dump,
    Entry,
    Lang,
}

fn short_flag(c: char) -> Option<Flag> {
    match c {
        'D' => Some(Flag::Device),
        'G' => Some(Flag::Groups),
        'S' => Some(Flag::Size),
        _ => None,
    }
}

fn long_flag(name: &str) -> Option<Flag> {
    match name {
        "device" => Some(Flag::Device),
        "groups" => Some(Flag::Groups),
        "size" => Some(Flag::Size),
        "dump" => Some(Flag::Dump),
        "entry" => Some(Flag::Entry),
        "lang" => Some(Flag::Lang),
        _ => None,
    }
}

/// Parse the command line, without the program name.
///
/// Values may be attached (`-D/dev/dri/renderD129`, `--size=64`) or
/// follow as the next argument.  Long options also work with a single
/// dash (`-device`).
pub fn parse_args<I, S>(args: I) -> Result<Command, UsageError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut options = Options::default();
    let mut dump_given = false;
    let mut shaders = Vec::new();
    let mut args = args.into_iter().map(Into::into);

    while let Some(arg) = args.next() {
        if arg == "-h" || arg == "--help" || arg == "-help" {
            return Ok(Command::Help);
        }
        if arg == "--" {
            shaders.extend(args.by_ref());
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            shaders.push(arg);
            continue;
        }

        let body = arg.trim_start_matches('-');
        let (name, inline) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (body, None),
        };

        let (flag, inline) = match long_flag(name) {
            Some(flag) => (flag, inline),
            None => {
                // `-Dvalue`: a single-dash short option with its value glued on.
                let mut chars = body.chars();
                let flag = match (arg.starts_with("--"), chars.next().and_then(short_flag)) {
                    (false, Some(flag)) => flag,
                    _ => return Err(UsageError::UnknownOption(arg)),
                };
                let rest = chars.as_str();
                let rest = rest.strip_prefix('=').unwrap_or(rest);
                (flag, (!rest.is_empty()).then(|| rest.to_string()))
            }
        };

        let value = match inline {
            Some(value) => value,
            None => args.next().ok_or_else(|| UsageError::MissingValue(arg.clone()))?,
        };

        match flag {
            Flag::Device => options.device = PathBuf::from(value),
            Flag::Groups => options.groups = value.parse()?,
            Flag::Size => {
                options.buffer_dwords = match value.trim().parse::<u32>() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(UsageError::Size(value)),
                }
            }
            Flag::Dump => {
                if !dump_given {
                    options.dump.clear();
                    dump_given = true;
                }
                options.dump.push(value);
            }
            Flag::Entry => options.entry = Some(value),
            Flag::Lang => {
                options.language = Some(value.parse().map_err(UsageError::Language)?);
            }
        }
    }

    match <[String; 1]>::try_from(shaders) {
        Ok([shader]) => {
            options.shader = PathBuf::from(shader);
            Ok(Command::Run(options))
        }
        Err(_) => Err(UsageError::Shader),
    }
}

pub fn usage(program: &str) -> String {
    format!(
        "Usage: {program} [-DGS] SHADER\n\
         \n\
         options:\n\
         \x20   -D, --device=DEVICE      use the given device (default {DEFAULT_DEVICE})\n\
         \x20   -G, --groups=X,Y,Z       use specified group size\n\
         \x20   -S, --size=DWORDS        size in dwords for UBOs, SSBOs (default {DEFAULT_BUFFER_DWORDS})\n\
         \x20       --dump=NAME          resource to dump after dispatch, repeatable (default {DEFAULT_DUMP})\n\
         \x20       --entry=NAME         compute entry point (default: the first one)\n\
         \x20       --lang=glsl|wgsl     shader language (default: from the file extension)\n\
         \x20   -h, --help               show this help\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> Options {
        match parse_args(args.iter().copied()) {
            Ok(Command::Run(options)) => options,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn defaults_with_only_a_shader() {
        let options = run(&["double.comp"]);
        assert_eq!(options.device, PathBuf::from("/dev/dri/renderD128"));
        assert_eq!(options.groups, WorkGroups { x: 1, y: 1, z: 1 });
        assert_eq!(options.buffer_dwords, 256);
        assert_eq!(options.shader, PathBuf::from("double.comp"));
        assert_eq!(options.dump, vec!["Output".to_string()]);
        assert_eq!(options.language(), ShaderLanguage::Glsl);
    }

    #[test]
    fn short_and_long_forms() {
        let expected = Options {
            device: PathBuf::from("/dev/dri/renderD129"),
            groups: WorkGroups { x: 4, y: 2, z: 1 },
            buffer_dwords: 64,
            shader: PathBuf::from("k.comp"),
            ..Options::default()
        };
        assert_eq!(run(&["-D", "/dev/dri/renderD129", "-G", "4,2,1", "-S", "64", "k.comp"]), expected);
        assert_eq!(run(&["-D/dev/dri/renderD129", "-G4,2,1", "-S64", "k.comp"]), expected);
        assert_eq!(
            run(&["--device=/dev/dri/renderD129", "--groups=4,2,1", "--size=64", "k.comp"]),
            expected
        );
        assert_eq!(
            run(&["k.comp", "-device", "/dev/dri/renderD129", "--groups", "4,2,1", "-size=64"]),
            expected
        );
    }

    #[test]
    fn dump_replaces_default_list() {
        let options = run(&["--dump", "img2d0out", "--dump=Output", "x.comp"]);
        assert_eq!(options.dump, vec!["img2d0out".to_string(), "Output".to_string()]);
    }

    #[test]
    fn entry_and_language() {
        let options = run(&["--entry=second", "--lang", "wgsl", "kernel.txt"]);
        assert_eq!(options.entry.as_deref(), Some("second"));
        assert_eq!(options.language(), ShaderLanguage::Wgsl);
        assert_eq!(run(&["a.wgsl"]).language(), ShaderLanguage::Wgsl);
    }

    #[test]
    fn help() {
        assert_eq!(parse_args(["-h"]), Ok(Command::Help));
        assert_eq!(parse_args(["x.comp", "--help"]), Ok(Command::Help));
    }

    #[test]
    fn zero_groups_parse() {
        let Ok(Command::Run(options)) = parse_args(["-G", "0,0,0", "x.comp"]) else {
            panic!("expected a run");
        };
        assert_eq!(options.groups, WorkGroups { x: 0, y: 0, z: 0 });
    }

    #[test]
    fn rejects_bad_groups() {
        for groups in ["1,2", "1,2,3,4", "a,b,c", "-1,1,1", ""] {
            assert_eq!(
                parse_args(["-G", groups, "x.comp"]),
                Err(UsageError::Groups(groups.to_string())),
                "{groups}"
            );
        }
    }

    #[test]
    fn rejects_bad_size() {
        assert_eq!(parse_args(["-S", "0", "x.comp"]), Err(UsageError::Size("0".into())));
        assert_eq!(parse_args(["-S", "lots", "x.comp"]), Err(UsageError::Size("lots".into())));
    }

    #[test]
    fn shader_count_must_be_one() {
        assert_eq!(parse_args(Vec::<String>::new()), Err(UsageError::Shader));
        assert_eq!(parse_args(["a.comp", "b.comp"]), Err(UsageError::Shader));
        assert_eq!(run(&["--", "-odd-name.comp"]).shader, PathBuf::from("-odd-name.comp"));
    }

    #[test]
    fn rejects_unknown_and_incomplete_options() {
        assert_eq!(
            parse_args(["-X", "x.comp"]),
            Err(UsageError::UnknownOption("-X".into()))
        );
        assert_eq!(
            parse_args(["--verbose", "x.comp"]),
            Err(UsageError::UnknownOption("--verbose".into()))
        );
        assert_eq!(
            parse_args(["x.comp", "-D"]),
            Err(UsageError::MissingValue("-D".into()))
        );
        assert_eq!(
            parse_args(["--lang=hlsl", "x.comp"]),
            Err(UsageError::Language("unknown shader language `hlsl`".into()))
        );
    }

    #[test]
    fn usage_lists_every_option() {
        let text = usage("render-node-compute");
        assert!(text.starts_with("Usage: render-node-compute [-DGS] SHADER\n"));
        for flag in ["--device", "--groups", "--size", "--dump", "--entry", "--lang", "--help"] {
            assert!(text.contains(flag), "{flag}");
        }
    }

    #[test]
    fn groups_display_round_trips_through_parse() {
        let groups: WorkGroups = "8, 8, 1".parse().unwrap();
        assert_eq!(groups.to_string(), "8,8,1");
        assert_eq!(groups.as_array(), [8, 8, 1]);
    }
}
