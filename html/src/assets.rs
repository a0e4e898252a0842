//! Files and images copied next to the pages that use them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use hm::ambient::{INPUT_DIR, OUTPUT_DIR};
use hm::paths::{normalize, relative_to, to_url, up_to_date};
use hm::{Engine, Frame, MacroEnv, Node, Result, RuntimeError, Stream, handler};

/// The image conversion program.
const CONVERT: &str = "convert";

fn directories(macros: &MacroEnv) -> (PathBuf, PathBuf) {
    (
        macros.path(INPUT_DIR).unwrap_or_default(),
        macros.path(OUTPUT_DIR).unwrap_or_default(),
    )
}

fn require_file(path: &Path) -> Result<(), RuntimeError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(RuntimeError::NoSuchFile(path.to_path_buf()))
    }
}

fn create_parent(path: &Path) -> Result<(), RuntimeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Copy `source` to `target` unless the copy is already current.
fn copy_if_stale(engine: &mut Engine, source: &Path, target: &Path) -> Result<(), RuntimeError> {
    require_file(source)?;
    create_parent(target)?;
    if up_to_date(source, target) {
        engine.log(&format!(
            "Copying {} to {}... already copied.",
            source.display(),
            target.display()
        ));
    } else {
        engine.log(&format!("Copying {} to {}", source.display(), target.display()));
        fs::copy(source, target)?;
    }
    Ok(())
}

/// `\file[text]{name}` copies `name` into the output directory and links to it.
fn file_link(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let text = engine.read_bracket_args(stream, frame)?;
    let name = engine.parse_argument(stream, frame, "file name")?;
    let macros = frame.macros.clone();
    Ok(Node::deferred(Some(position), move |engine, bindings| {
        let name = engine.static_text(&name, bindings, "file name")?;
        let text = match &text {
            Some(text) => text.evaluate(engine, bindings)?,
            None => Node::text(
                Path::new(&name)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone()),
            ),
        };
        let (input_dir, output_dir) = directories(&macros);
        let source = normalize(&input_dir.join(&name));
        let target = normalize(&output_dir.join(&name));
        copy_if_stale(engine, &source, &target)?;
        let href = to_url(&relative_to(&target, &output_dir));
        Ok(Node::text(format!("<A HREF=\"{}\">", href)) + text + Node::text("</A>"))
    }))
}

/// Options of `\includegraphics`, written `key=value,key=value`.
#[derive(Debug, Default, PartialEq)]
pub struct ImageOptions {
    pub width: String,
    pub height: String,
    pub ext: Option<String>,
    pub page: Option<String>,
    pub alt: String,
}

impl ImageOptions {
    pub fn parse(text: &str) -> Self {
        let options: HashMap<&str, &str> = text
            .split(',')
            .filter_map(|option| {
                let (key, value) = option.split_once('=').unwrap_or((option, ""));
                let key = key.trim();
                (!key.is_empty()).then(|| (key, value.trim()))
            })
            .collect();
        let get = |key: &str| options.get(key).map(|value| value.to_string());
        ImageOptions {
            width: get("width").unwrap_or_default(),
            height: get("height").unwrap_or_default(),
            ext: get("ext"),
            page: get("page"),
            alt: get("alt").unwrap_or_default(),
        }
    }

    /// The `-resize` geometry, empty when the size is unchanged.
    fn resize(&self) -> String {
        if self.height.is_empty() {
            self.width.clone()
        } else {
            format!("{}x{}", self.width, self.height)
        }
    }

    fn needs_conversion(&self) -> bool {
        !self.width.is_empty() || !self.height.is_empty() || self.ext.is_some() || self.page.is_some()
    }

    /// The file name of the converted image, marked with its size and page.
    fn output_name(&self, file_name: &str) -> String {
        let mut name = String::new();
        let resize = self.resize();
        if !resize.is_empty() {
            name.push_str(&resize);
            name.push('_');
        }
        if let Some(page) = &self.page {
            name.push_str(&format!("_p{}_", page));
        }
        name.push_str(file_name);
        if let Some(ext) = &self.ext {
            name.push('.');
            name.push_str(ext);
        }
        name
    }
}

fn convert(
    engine: &mut Engine,
    source: &Path,
    target: &Path,
    options: &ImageOptions,
) -> Result<(), RuntimeError> {
    require_file(source)?;
    create_parent(target)?;
    if up_to_date(source, target) {
        engine.log(&format!(
            "Converting {} to {}... already converted.",
            source.display(),
            target.display()
        ));
        return Ok(());
    }
    engine.log(&format!("Converting {} to {}", source.display(), target.display()));

    let mut input = source.as_os_str().to_os_string();
    if let Some(page) = &options.page {
        input.push(format!("[{}]", page));
    }
    let mut command = Command::new(CONVERT);
    command.arg(input);
    let resize = options.resize();
    if !resize.is_empty() {
        command.arg("-resize").arg(resize);
    }
    command.arg(target);

    let failed = |status: String| RuntimeError::AssetConversionFailed {
        program: CONVERT.to_string(),
        input: source.to_path_buf(),
        status,
    };
    let status = command.status().map_err(|e| failed(e.to_string()))?;
    if !status.success() {
        return Err(failed(status.to_string()));
    }
    Ok(())
}

/// `\includegraphics[options]{name}` places an image, copied or converted
/// into the output directory.
fn include_graphics(
    engine: &mut Engine,
    stream: &mut dyn Stream,
    frame: &Frame<'_>,
) -> Result<Node> {
    let position = stream.position();
    let options = engine.read_bracket_args(stream, frame)?;
    let name = engine.parse_argument(stream, frame, "image file name")?;
    let macros = frame.macros.clone();
    Ok(Node::deferred(Some(position), move |engine, bindings| {
        let name = engine.static_text(&name, bindings, "image file name")?;
        let options = match &options {
            Some(options) => ImageOptions::parse(&engine.static_text(options, bindings, "image options")?),
            None => ImageOptions::default(),
        };
        let (input_dir, output_dir) = directories(&macros);
        let source = normalize(&input_dir.join(&name));
        let relative = Path::new(&name);
        let target_dir = normalize(&output_dir.join(relative.parent().unwrap_or(Path::new(""))));
        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RuntimeError::NoSuchFile(source.clone()))?;

        let target = if options.needs_conversion() {
            let target = target_dir.join(options.output_name(&file_name));
            convert(engine, &source, &target, &options)?;
            target
        } else {
            let target = target_dir.join(&file_name);
            copy_if_stale(engine, &source, &target)?;
            target
        };
        let src = to_url(&relative_to(&target, &output_dir));
        Ok(Node::text(format!("<IMG ALT=\"{}\" SRC=\"{}\">", options.alt, src)))
    }))
}

pub(crate) fn install(engine: &mut Engine) {
    engine.register_macro("file", handler(file_link));
    engine.register_macro("includegraphics", handler(include_graphics));
}
