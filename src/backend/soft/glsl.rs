//! Declaration scanning for the soft device.
//!
//! Only top-level declarations are reflected: `in` attributes of the vertex stage, default-block
//! `uniform`s, named uniform and storage blocks, and the fragment output. The fragment output
//! must be assigned one of a small set of expressions (see [`FragmentExpr`]).

use std::collections::BTreeMap;

use crate::shader::ShaderStage;
use crate::uniform::UniformType;

/// A scanned shader stage.
#[derive(Clone, Debug, Default)]
pub(super) struct StageInfo {
    pub attributes: Vec<Declaration>,
    pub uniforms: Vec<Declaration>,
    pub uniform_blocks: Vec<String>,
    pub storage_blocks: Vec<String>,
    pub output: Option<String>,
    pub output_expr: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub(super) struct Declaration {
    pub name: String,
    pub ty: UniformType,
    pub size: u32,
    pub location: Option<u32>,
}

/// What a fragment shader writes to its output.
#[derive(Clone, Debug, PartialEq)]
pub(super) enum FragmentExpr {
    Constant([f64; 4]),
    Uniform(String),
    /// One element of a uniform array.
    Element(String, u32),
    TexelFetch {
        sampler: String,
        offset: Option<String>,
        level: Level,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Level {
    Literal(u32),
    Uniform(String),
}

/// Scan one stage; the error is a compiler-style log.
pub(super) fn scan(stage: ShaderStage, source: &str) -> Result<StageInfo, String> {
    let source = strip_comments(source);

    if !source.contains("void main") {
        return Err("0:1: error: missing entry point 'main'".to_owned());
    }

    let mut info = StageInfo::default();
    let mut depth = 0;
    let mut statement = String::new();
    let mut main_body = String::new();
    let mut in_main = false;

    for ch in source.chars() {
        match ch {
            '{' => {
                if depth == 0 {
                    let header = normalize(&statement);
                    if let Some(name) = block_name(&header, "uniform") {
                        info.uniform_blocks.push(name);
                    } else if let Some(name) = block_name(&header, "buffer") {
                        info.storage_blocks.push(name);
                    }
                    in_main = header.starts_with("void main");
                    statement.clear();
                } else if in_main {
                    main_body.push(ch);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    in_main = false;
                    statement.clear();
                } else if in_main {
                    main_body.push(ch);
                }
            }
            ';' if depth == 0 => {
                declaration(stage, &normalize(&statement), &mut info)?;
                statement.clear();
            }
            _ if depth == 0 => statement.push(ch),
            _ if in_main => main_body.push(ch),
            _ => (),
        }
    }

    if depth != 0 {
        return Err("0:1: error: unbalanced braces".to_owned());
    }

    if let Some(output) = &info.output {
        info.output_expr = main_body.split(';').find_map(|s| {
            let s = normalize(s);
            let (lhs, rhs) = s.split_once('=')?;
            if lhs.trim() == output {
                Some(rhs.trim().to_owned())
            } else {
                None
            }
        });
    }

    Ok(info)
}

/// Parse the expression assigned to the fragment output.
pub(super) fn parse_fragment_expr(expr: &str) -> Option<FragmentExpr> {
    let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();

    for ctor in &["vec4(", "ivec4(", "uvec4("] {
        if let Some(args) = compact.strip_prefix(ctor).and_then(|r| r.strip_suffix(')')) {
            let values: Vec<f64> = args
                .split(',')
                .map(|a| a.trim_end_matches('u').parse().ok())
                .collect::<Option<_>>()?;
            return match values.len() {
                1 => Some(FragmentExpr::Constant([values[0]; 4])),
                4 => Some(FragmentExpr::Constant([values[0], values[1], values[2], values[3]])),
                _ => None,
            };
        }
    }

    if let Some(args) = compact
        .strip_prefix("texelFetch(")
        .and_then(|r| r.strip_suffix(')'))
    {
        let args = split_args(args);
        if args.len() != 3 {
            return None;
        }

        let coord = args[1].strip_prefix("ivec2(gl_FragCoord.xy)")?;
        let offset = match coord {
            "" => None,
            rest => Some(rest.strip_prefix('+')?.to_owned()),
        };
        let level = match args[2].parse() {
            Ok(level) => Level::Literal(level),
            Err(_) if is_identifier(&args[2]) => Level::Uniform(args[2].clone()),
            Err(_) => return None,
        };

        return Some(FragmentExpr::TexelFetch {
            sampler: args[0].clone(),
            offset,
            level,
        });
    }

    if is_identifier(&compact) {
        return Some(FragmentExpr::Uniform(compact));
    }

    if let Some((name, index)) = compact.strip_suffix(']').and_then(|r| r.split_once('[')) {
        if is_identifier(name) {
            return Some(FragmentExpr::Element(name.to_owned(), index.parse().ok()?));
        }
    }

    None
}

/// Locations of vertex attributes: explicit ones first, the rest in declaration order.
pub(super) fn assign_locations(attributes: &[Declaration]) -> BTreeMap<String, (u32, u32)> {
    let mut assigned = BTreeMap::new();
    let mut used = Vec::new();

    for a in attributes.iter().filter(|a| a.location.is_some()) {
        let location = a.location.unwrap_or(0);
        let span = slots(a);
        used.extend(location..location + span);
        assigned.insert(a.name.clone(), (location, a.size));
    }

    let mut next = 0;
    for a in attributes.iter().filter(|a| a.location.is_none()) {
        let span = slots(a);
        while (next..next + span).any(|l| used.contains(&l)) {
            next += 1;
        }
        used.extend(next..next + span);
        assigned.insert(a.name.clone(), (next, a.size));
        next += span;
    }

    assigned
}

fn slots(attribute: &Declaration) -> u32 {
    let columns = match attribute.ty {
        UniformType::Mat2 => 2,
        UniformType::Mat3 => 3,
        UniformType::Mat4 => 4,
        _ => 1,
    };
    columns * attribute.size
}

fn declaration(stage: ShaderStage, statement: &str, info: &mut StageInfo) -> Result<(), String> {
    let (location, rest) = split_layout(statement);
    let mut words: Vec<&str> = rest
        .split_whitespace()
        .filter(|w| !is_qualifier(w))
        .collect();

    let storage = match words.first() {
        Some(&w) if w == "in" || w == "out" || w == "uniform" => w,
        _ => return Ok(()),
    };
    words.remove(0);

    if words.len() != 2 {
        return Ok(());
    }

    let (name, size) = array_declarator(words[1])?;
    let ty = UniformType::from_glsl(words[0]);

    match (storage, stage) {
        ("in", ShaderStage::Vertex) => {
            let ty = ty.ok_or_else(|| format!("0:1: error: unknown type '{}'", words[0]))?;
            info.attributes.push(Declaration {
                name,
                ty,
                size,
                location,
            });
        }
        ("out", ShaderStage::Fragment) => info.output = Some(name),
        ("uniform", _) => {
            if let Some(ty) = ty {
                info.uniforms.push(Declaration {
                    name,
                    ty,
                    size,
                    location: None,
                });
            }
        }
        _ => (),
    }

    Ok(())
}

fn block_name(header: &str, storage: &str) -> Option<String> {
    let (_, rest) = split_layout(header);
    let words: Vec<&str> = rest
        .split_whitespace()
        .filter(|w| !is_qualifier(w))
        .collect();

    match words.as_slice() {
        [s, name] if *s == storage => Some((*name).to_owned()),
        _ => None,
    }
}

fn split_layout(statement: &str) -> (Option<u32>, &str) {
    let statement = statement.trim();

    let rest = match statement.strip_prefix("layout") {
        Some(r) => r.trim_start(),
        None => return (None, statement),
    };

    let close = match rest.find(')') {
        Some(c) if rest.starts_with('(') => c,
        _ => return (None, statement),
    };

    let location = rest[1..close].split(',').find_map(|q| {
        let (key, value) = q.split_once('=')?;
        if key.trim() == "location" {
            value.trim().parse().ok()
        } else {
            None
        }
    });

    (location, &rest[close + 1..])
}

fn array_declarator(declarator: &str) -> Result<(String, u32), String> {
    match declarator.split_once('[') {
        None => Ok((declarator.to_owned(), 1)),
        Some((name, rest)) => {
            let size = rest
                .trim_end_matches(']')
                .parse()
                .map_err(|_| format!("0:1: error: invalid array size in '{}'", declarator))?;
            Ok((name.to_owned(), size))
        }
    }
}

fn is_qualifier(word: &str) -> bool {
    matches!(
        word,
        "highp"
            | "mediump"
            | "lowp"
            | "flat"
            | "smooth"
            | "noperspective"
            | "centroid"
            | "readonly"
            | "writeonly"
            | "coherent"
            | "restrict"
            | "volatile"
    )
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0;
    let mut current = String::new();

    for ch in args.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    out.push(current);

    out
}

fn normalize(s: &str) -> String {
    s.lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();

    while let Some(ch) = chars.next() {
        match (ch, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut last = ' ';
                for c in chars.by_ref() {
                    if last == '*' && c == '/' {
                        break;
                    }
                    last = c;
                }
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "#version 330 core
        // position first
        in vec2 a_position;
        layout(location = 3) in mat2 a_basis;
        in vec4 a_color;
        uniform mat4 u_view;
        uniform Lights { vec4 light; };
        void main() { gl_Position = vec4(a_position, 0.0, 1.0); }";

    const FRAGMENT: &str = "#version 330 core
        uniform vec4 u_color;
        uniform float u_weights[3];
        layout(std430, binding = 0) buffer Particles { vec4 p[]; };
        out vec4 o_color;
        void main() {
            o_color = u_color;
        }";

    #[test]
    fn vertex_declarations() {
        let info = scan(ShaderStage::Vertex, VERTEX).unwrap();
        assert_eq!(info.attributes.len(), 3);
        assert_eq!(info.uniforms[0].name, "u_view");
        assert_eq!(info.uniform_blocks, vec!["Lights".to_owned()]);

        let locations = assign_locations(&info.attributes);
        assert_eq!(locations["a_position"], (0, 1));
        assert_eq!(locations["a_basis"], (3, 1));
        assert_eq!(locations["a_color"], (1, 1));
    }

    #[test]
    fn fragment_declarations() {
        let info = scan(ShaderStage::Fragment, FRAGMENT).unwrap();
        assert_eq!(info.output.as_deref(), Some("o_color"));
        assert_eq!(info.output_expr.as_deref(), Some("u_color"));
        assert_eq!(info.uniforms[1].size, 3);
        assert_eq!(info.storage_blocks, vec!["Particles".to_owned()]);
    }

    #[test]
    fn fragment_expressions() {
        assert_eq!(
            parse_fragment_expr("vec4(1.0, 0.0, 0.0, 1.0)"),
            Some(FragmentExpr::Constant([1.0, 0.0, 0.0, 1.0]))
        );
        assert_eq!(
            parse_fragment_expr("texelFetch(tex0, ivec2(gl_FragCoord.xy) + offset, level)"),
            Some(FragmentExpr::TexelFetch {
                sampler: "tex0".to_owned(),
                offset: Some("offset".to_owned()),
                level: Level::Uniform("level".to_owned()),
            })
        );
        assert_eq!(parse_fragment_expr("texture(tex0, uv)"), None);
        assert_eq!(
            parse_fragment_expr("u_colors[ 2 ]"),
            Some(FragmentExpr::Element("u_colors".to_owned(), 2))
        );
        assert_eq!(parse_fragment_expr("u_colors[i]"), None);
    }

    #[test]
    fn missing_main() {
        assert!(scan(ShaderStage::Vertex, "in vec2 a_position;").is_err());
    }
}
