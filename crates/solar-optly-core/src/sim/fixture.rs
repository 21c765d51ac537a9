use serde::{Deserialize, Serialize};

use super::dom::Document;
use crate::config::ControllerConfig;
use crate::host::NodeId;

pub const ROW_CLASSES: &str = "vc_row wpb_row vc_row-fluid background-position-center-center";

/// Marketing-page markup: a stack of content rows, one of which holds the
/// form widget wrapper and its iframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageFixture {
    /// `None` renders the page without the form widget.
    pub iframe_id: Option<String>,
    pub iframe_src: String,
    pub rows: usize,
    pub form_row: usize,
}

impl Default for PageFixture {
    fn default() -> Self {
        Self {
            iframe_id: Some("mvfFormWidget-7d3c".to_string()),
            iframe_src: "https://forms.chameleon.example/widget/solar".to_string(),
            rows: 3,
            form_row: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub document: Document,
    pub rows: Vec<NodeId>,
    pub iframe: Option<NodeId>,
}

impl PageFixture {
    pub fn render(&self, config: &ControllerConfig) -> RenderedPage {
        let mut document = Document::new();
        let body = document.body();
        let rows = (0..self.rows)
            .map(|index| {
                let id = format!("row-{index}");
                document.build(body, "div", &[("class", ROW_CLASSES), ("id", id.as_str())])
            })
            .collect::<Vec<_>>();

        let iframe = match (&self.iframe_id, rows.get(self.form_row).or(rows.last())) {
            (Some(id), Some(row)) => Some(widget(&mut document, *row, config, id, &self.iframe_src)),
            (Some(id), None) => Some(widget(&mut document, body, config, id, &self.iframe_src)),
            (None, _) => None,
        };

        RenderedPage {
            document,
            rows,
            iframe,
        }
    }
}

/// Builds `div.<wrapper> > div.widget-card > iframe#<id>` under `parent`.
pub fn widget(document: &mut Document, parent: NodeId, config: &ControllerConfig, id: &str, src: &str) -> NodeId {
    let column = document.build(parent, "div", &[("class", "wpb_column vc_column_container")]);
    let wrapper = document.build(column, "div", &[("class", config.wrapper_class.as_str())]);
    let card = document.build(wrapper, "div", &[("class", "widget-card")]);
    document.build(card, "iframe", &[("id", id), ("src", src), ("title", "Solar quote form")])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fixture_matches_configured_selectors() {
        let config = ControllerConfig::default();
        let rendered = PageFixture::default().render(&config);

        let rows = rendered
            .document
            .query_all(None, &config.hidden_main_page_row_selector)
            .expect("row selector parses");
        assert_eq!(rows, rendered.rows);

        let iframe = rendered.iframe.expect("fixture has an iframe");
        let wrapper = rendered.document.closest_with_class(iframe, &config.wrapper_class);
        assert!(wrapper.is_some());
    }
}
