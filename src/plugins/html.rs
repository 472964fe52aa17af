//! HTML page generation
//!
//! Renders the configured template with a `<link>` for every stylesheet and a
//! `<script>` for every script the manifest references.

use std::fs;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Plugin, PluginContext};
use crate::config::HtmlConfig;
use crate::emitter::{AssetKind, EmitPlan, EmittedAsset};

static HTML_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static BETWEEN_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r">\s+<").unwrap());

pub struct HtmlPlugin {
    config: HtmlConfig,
    public_url: String,
}

impl HtmlPlugin {
    pub fn new(config: HtmlConfig, public_url: String) -> Self {
        Self { config, public_url }
    }

    fn url(&self, file: &str) -> String {
        if self.public_url.ends_with('/') {
            format!("{}{}", self.public_url, file)
        } else {
            format!("{}/{}", self.public_url, file)
        }
    }

    /// Inject tags for `files` into `template`
    pub fn render(&self, template: &str, files: &[&str]) -> String {
        let links: String = files
            .iter()
            .filter(|f| f.ends_with(".css"))
            .map(|f| format!("<link rel=\"stylesheet\" href=\"{}\">\n", self.url(f)))
            .collect();
        let scripts: String = files
            .iter()
            .filter(|f| f.ends_with(".js"))
            .map(|f| format!("<script src=\"{}\"></script>\n", self.url(f)))
            .collect();

        let with_links = insert_before(template, "</head>", &links);
        let html = insert_before(&with_links, "</body>", &scripts);

        if self.config.minify {
            let html = HTML_COMMENT.replace_all(&html, "");
            BETWEEN_TAGS.replace_all(html.trim(), "><").into_owned()
        } else {
            html
        }
    }
}

/// Insert `content` before the first `marker`, or append it
fn insert_before(html: &str, marker: &str, content: &str) -> String {
    match html.find(marker) {
        Some(at) => format!("{}{}{}", &html[..at], content, &html[at..]),
        None => format!("{}{}", html, content),
    }
}

#[async_trait]
impl Plugin for HtmlPlugin {
    fn name(&self) -> &str {
        "html"
    }

    async fn pre_emit(&self, plan: &mut EmitPlan, ctx: &PluginContext) -> Result<()> {
        let template_path = ctx.root.join(&self.config.template);
        let template = fs::read_to_string(&template_path)
            .with_context(|| format!("Failed to read HTML template {}", template_path.display()))?;

        let files = plan.manifest.files();
        let html = self.render(&template, &files);

        plan.add_asset(EmittedAsset {
            file_name: self.config.filename.clone(),
            content: html,
            kind: AssetKind::Html,
            chunk: None,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::BuildManifest;
    use pretty_assertions::assert_eq;

    fn plugin(minify: bool) -> HtmlPlugin {
        HtmlPlugin::new(
            HtmlConfig {
                template: "index.html".to_string(),
                filename: "index.html".to_string(),
                minify,
            },
            "/static/".to_string(),
        )
    }

    const TEMPLATE: &str = "<html>\n  <head>\n    <!-- title -->\n  </head>\n  <body>\n  </body>\n</html>\n";

    #[test]
    fn test_render_injects_tags() {
        let html = plugin(false).render(TEMPLATE, &["vendor.js", "main.js", "main.css"]);
        assert!(html.contains("<link rel=\"stylesheet\" href=\"/static/main.css\">\n</head>"));
        assert!(html.contains(
            "<script src=\"/static/vendor.js\"></script>\n<script src=\"/static/main.js\"></script>\n</body>"
        ));
    }

    #[test]
    fn test_render_minified() {
        let html = plugin(true).render(TEMPLATE, &["main.js"]);
        assert_eq!(
            html,
            "<html><head></head><body><script src=\"/static/main.js\"></script></body></html>"
        );
    }

    #[tokio::test]
    async fn test_pre_emit_adds_page() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), TEMPLATE).unwrap();

        let mut plan = EmitPlan::default();
        let mut manifest = BuildManifest::new();
        manifest.insert("main", vec!["main.js".to_string()]);
        plan.manifest = manifest;

        let ctx = PluginContext { root: dir.path().to_path_buf() };
        plugin(false).pre_emit(&mut plan, &ctx).await.unwrap();

        let page = plan.find("index.html").unwrap();
        assert_eq!(page.kind, AssetKind::Html);
        assert!(page.content.contains("/static/main.js"));
    }
}
