// i18n.rs - 运行时界面文字
//
// 文字表来源 (依次):
//   A) assets/i18n/<lang>.json
//   B) assets/i18n.json  ({ "<lang>": { "key": "value" } })
//   C) 编译进程序的英文表 (保证没有 assets 目录时也有可读文字)
// 查找: tr("key") / tr_with("key", &[("name", ...)])，{name} 为占位符
//
// 语言选择: CLI --lang <code>，其次 env PANORAMA_LANG，默认 en

use once_cell::sync::OnceCell;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

pub const DEFAULT_LANG: &str = "en";

static BUILTIN_EN: &str = include_str!("../assets/i18n/en.json");

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub lang: String,
    map: HashMap<String, String>,
    fallback_map: HashMap<String, String>,
}

impl Catalog {
    pub fn from_maps(
        lang: &str,
        map: HashMap<String, String>,
        fallback_map: HashMap<String, String>,
    ) -> Self {
        Self {
            lang: lang.to_string(),
            map,
            fallback_map,
        }
    }

    /// Selected language first, then the fallback table, then the key itself.
    pub fn lookup(&self, key: &str) -> String {
        self.map
            .get(key)
            .or_else(|| self.fallback_map.get(key))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    pub fn lookup_with(&self, key: &str, args: &[(&str, String)]) -> String {
        fill(self.lookup(key), args)
    }
}

static I18N: OnceCell<RwLock<Catalog>> = OnceCell::new();

fn fill(mut s: String, args: &[(&str, String)]) -> String {
    for (k, v) in args {
        let placeholder = format!("{{{}}}", k);
        s = s.replace(&placeholder, v);
    }
    s
}

fn builtin() -> HashMap<String, String> {
    serde_json::from_str(BUILTIN_EN).unwrap_or_default()
}

fn load_json_map(path: &Path) -> Option<HashMap<String, String>> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn load_multi_lang_json(path: &Path, lang: &str) -> Option<HashMap<String, String>> {
    let text = std::fs::read_to_string(path).ok()?;
    let mut all: HashMap<String, HashMap<String, String>> = serde_json::from_str(&text).ok()?;
    all.remove(lang)
}

/// `<exe_dir>/assets/<rel>` first, then `./assets/<rel>`.
fn find_asset(rel: &Path) -> Option<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    exe_dir
        .into_iter()
        .chain(std::iter::once(PathBuf::new()))
        .map(|dir| dir.join("assets").join(rel))
        .find(|p| p.exists())
}

fn load_lang(lang: &str) -> Option<HashMap<String, String>> {
    let per_lang = Path::new("i18n").join(format!("{}.json", lang));
    if let Some(m) = find_asset(&per_lang).and_then(|p| load_json_map(&p)) {
        return Some(m);
    }
    find_asset(Path::new("i18n.json")).and_then(|p| load_multi_lang_json(&p, lang))
}

/// (Re)initialise the global catalogue. Later calls replace the language.
pub fn init(lang: impl Into<String>) {
    let lang = lang.into();

    let mut fallback_map = builtin();
    if let Some(en) = load_lang(DEFAULT_LANG) {
        fallback_map.extend(en);
    }
    let map = if lang == DEFAULT_LANG {
        HashMap::new()
    } else {
        load_lang(&lang).unwrap_or_else(|| {
            log::warn!("no strings for language '{}', using {}", lang, DEFAULT_LANG);
            HashMap::new()
        })
    };

    let catalog = Catalog::from_maps(&lang, map, fallback_map);
    if let Some(lock) = I18N.get() {
        if let Ok(mut w) = lock.write() {
            *w = catalog;
        }
    } else {
        let _ = I18N.set(RwLock::new(catalog));
    }
}

pub fn tr(key: &str) -> String {
    match I18N.get().and_then(|l| l.read().ok()) {
        Some(c) => c.lookup(key),
        None => builtin().remove(key).unwrap_or_else(|| key.to_string()),
    }
}

pub fn tr_with(key: &str, args: &[(&str, String)]) -> String {
    fill(tr(key), args)
}

pub fn resolve_lang_from_args() -> String {
    let mut it = std::env::args();
    while let Some(a) = it.next() {
        if a == "--lang" {
            if let Some(v) = it.next() {
                return v;
            }
        }
    }

    if let Ok(v) = std::env::var("PANORAMA_LANG") {
        if !v.trim().is_empty() {
            return v;
        }
    }

    DEFAULT_LANG.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn lookup_falls_back_then_echoes_key() {
        let c = Catalog::from_maps(
            "zh-Hans",
            map(&[("ui.follow", "跟随")]),
            map(&[("ui.follow", "Follow"), ("ui.drag", "Drag")]),
        );
        assert_eq!(c.lookup("ui.follow"), "跟随");
        assert_eq!(c.lookup("ui.drag"), "Drag");
        assert_eq!(c.lookup("ui.missing"), "ui.missing");
    }

    #[test]
    fn placeholders_are_substituted() {
        let c = Catalog::from_maps(
            "en",
            map(&[("status.loading", "Loading {name}: {done}/{total}")]),
            HashMap::new(),
        );
        let s = c.lookup_with(
            "status.loading",
            &[("name", "hall".into()), ("done", 3.to_string())],
        );
        assert_eq!(s, "Loading hall: 3/{total}");
    }

    #[test]
    fn builtin_table_parses() {
        let en = builtin();
        assert!(en.contains_key("app.title"));
        assert!(en.contains_key("ui.mode.follow"));
    }
}
