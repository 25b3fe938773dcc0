use std::error::Error;
use std::path::{Path, PathBuf};

use fancy_regex::Regex;

use crate::fs::FileSystem;
use crate::types::{Domain, Domains};

const DOMAIN_NAME_PATTERN: &str =
  r"^(?i)[a-z0-9]+(-[a-z0-9]+)*(\.[a-z0-9]+(-[a-z0-9]+)*)*$";

/// A TLS-enabled nginx virtual host: its server names and the certificate
/// and key paths its configuration points at.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VhostConfig {
  pub server_names: Domains,
  pub cert_path: PathBuf,
  pub key_path: PathBuf,
}

#[derive(Clone, Debug)]
struct Directive {
  name: String,
  args: Vec<String>,
  block: Option<Vec<Directive>>,
}

/// Parses an nginx configuration (following `include` directives) and
/// returns every `server` block carrying both `ssl_certificate` and
/// `ssl_certificate_key`. Vhosts with invalid server names are skipped;
/// the validation pattern rejects wildcards and punctuation.
pub fn parse_config(
  fs: &dyn FileSystem,
  path: &Path,
) -> Result<Vec<VhostConfig>, Box<dyn Error + Send + Sync>> {
  let directives = parse_file(fs, path)?;
  let pattern = Regex::new(DOMAIN_NAME_PATTERN)?;

  let mut vhosts = Vec::new();
  collect_vhosts(&directives, &pattern, &mut vhosts);
  Ok(vhosts)
}

fn parse_file(
  fs: &dyn FileSystem,
  path: &Path,
) -> Result<Vec<Directive>, Box<dyn Error + Send + Sync>> {
  let content = fs.read(path)?;
  let content = String::from_utf8_lossy(&content).to_string();
  let tokens = tokenize(&content);
  let mut position = 0;
  let directives = parse_directives(&tokens, &mut position, path)
    .map_err(|err| anyhow::anyhow!("failed to parse config ({}): {err}", path.display()))?;
  resolve_includes(fs, path, directives)
}

fn tokenize(content: &str) -> Vec<String> {
  let mut tokens = Vec::new();
  let mut current = String::new();
  let mut chars = content.chars().peekable();

  while let Some(character) = chars.next() {
    match character {
      '#' => {
        for comment_char in chars.by_ref() {
          if comment_char == '\n' {
            break;
          }
        }
      }
      '"' | '\'' => {
        let quote = character;
        for quoted in chars.by_ref() {
          if quoted == quote {
            break;
          }
          current.push(quoted);
        }
        tokens.push(std::mem::take(&mut current));
      }
      '{' | '}' | ';' => {
        if !current.is_empty() {
          tokens.push(std::mem::take(&mut current));
        }
        tokens.push(character.to_string());
      }
      c if c.is_whitespace() => {
        if !current.is_empty() {
          tokens.push(std::mem::take(&mut current));
        }
      }
      c => current.push(c),
    }
  }
  if !current.is_empty() {
    tokens.push(current);
  }

  tokens
}

fn parse_directives(
  tokens: &[String],
  position: &mut usize,
  path: &Path,
) -> Result<Vec<Directive>, String> {
  let mut directives = Vec::new();
  let mut words: Vec<String> = Vec::new();

  while *position < tokens.len() {
    let token = &tokens[*position];
    *position += 1;
    match token.as_str() {
      ";" => {
        if let Some((name, args)) = words.split_first() {
          directives.push(Directive {
            name: name.clone(),
            args: args.to_vec(),
            block: None,
          });
        }
        words.clear();
      }
      "{" => {
        let block = parse_directives(tokens, position, path)?;
        let (name, args) = words
          .split_first()
          .map(|(name, args)| (name.clone(), args.to_vec()))
          .unwrap_or_default();
        directives.push(Directive {
          name,
          args,
          block: Some(block),
        });
        words.clear();
      }
      "}" => {
        if !words.is_empty() {
          return Err(format!("unexpected \"}}\" in {}", path.display()));
        }
        return Ok(directives);
      }
      word => words.push(word.to_string()),
    }
  }

  if !words.is_empty() {
    return Err(format!("unterminated directive in {}", path.display()));
  }
  Ok(directives)
}

fn resolve_includes(
  fs: &dyn FileSystem,
  path: &Path,
  directives: Vec<Directive>,
) -> Result<Vec<Directive>, Box<dyn Error + Send + Sync>> {
  let base_dir = path.parent().unwrap_or(Path::new("/")).to_path_buf();
  let mut resolved = Vec::new();

  for directive in directives {
    if directive.name == "include" && directive.block.is_none() {
      for pattern in &directive.args {
        let absolute = if Path::new(pattern).is_absolute() {
          pattern.clone()
        } else {
          base_dir.join(pattern).to_string_lossy().to_string()
        };
        for included in fs.glob(&absolute)? {
          resolved.extend(parse_file(fs, &included)?);
        }
      }
      continue;
    }

    let Directive { name, args, block } = directive;
    let block = match block {
      Some(block) => Some(resolve_includes(fs, path, block)?),
      None => None,
    };
    resolved.push(Directive { name, args, block });
  }

  Ok(resolved)
}

fn collect_vhosts(directives: &[Directive], pattern: &Regex, vhosts: &mut Vec<VhostConfig>) {
  for directive in directives {
    let Some(block) = &directive.block else {
      continue;
    };

    if directive.name == "server" {
      if let Some(vhost) = vhost_from_server_block(block, pattern) {
        vhosts.push(vhost);
      }
      continue;
    }
    collect_vhosts(block, pattern, vhosts);
  }
}

fn vhost_from_server_block(block: &[Directive], pattern: &Regex) -> Option<VhostConfig> {
  let mut vhost = VhostConfig::default();
  let mut has_cert = false;
  let mut has_key = false;

  for directive in block {
    match directive.name.as_str() {
      "server_name" => {
        for name in &directive.args {
          vhost.server_names.push(Domain::new(name.clone()));
        }
      }
      "ssl_certificate" if directive.args.len() == 1 => {
        vhost.cert_path = PathBuf::from(&directive.args[0]);
        has_cert = true;
      }
      "ssl_certificate_key" if directive.args.len() == 1 => {
        vhost.key_path = PathBuf::from(&directive.args[0]);
        has_key = true;
      }
      _ => {}
    }
  }

  if !has_cert || !has_key || vhost.server_names.is_empty() {
    return None;
  }
  let all_valid = vhost
    .server_names
    .iter()
    .all(|name| pattern.is_match(name.as_str()).unwrap_or(false));
  if !all_valid {
    return None;
  }
  Some(vhost)
}
