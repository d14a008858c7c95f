//! Minimal OFX element tree used to serialize requests.

/// A request element: either a leaf field or an aggregate of children.
#[derive(Debug, Clone)]
pub(crate) enum Element {
    Field(&'static str, String),
    Aggregate(&'static str, Vec<Element>),
}

pub(crate) fn field(tag: &'static str, value: impl Into<String>) -> Element {
    Element::Field(tag, value.into())
}

pub(crate) fn aggregate(tag: &'static str, children: Vec<Element>) -> Element {
    Element::Aggregate(tag, children)
}

impl Element {
    /// Serialize to CRLF-separated lines.
    ///
    /// Fields with an empty value are dropped entirely. Aggregates always
    /// close; leaf fields close only in XML framing.
    pub(crate) fn render(&self, xml: bool) -> String {
        let mut lines = Vec::new();
        self.render_into(xml, &mut lines);
        lines.join("\r\n")
    }

    fn render_into(&self, xml: bool, lines: &mut Vec<String>) {
        match self {
            Element::Field(tag, value) => {
                let value = value.trim();
                if value.is_empty() {
                    return;
                }
                if xml {
                    lines.push(format!("<{tag}>{value}</{tag}>"));
                } else {
                    lines.push(format!("<{tag}>{value}"));
                }
            }
            Element::Aggregate(tag, children) => {
                lines.push(format!("<{tag}>"));
                for child in children {
                    child.render_into(xml, lines);
                }
                lines.push(format!("</{tag}>"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Element {
        aggregate(
            "FI",
            vec![field("ORG", "ACME"), field("FID", ""), field("APPID", "  ")],
        )
    }

    #[test]
    fn sgml_leaves_fields_open() {
        assert_eq!(sample().render(false), "<FI>\r\n<ORG>ACME\r\n</FI>");
    }

    #[test]
    fn xml_closes_fields() {
        assert_eq!(sample().render(true), "<FI>\r\n<ORG>ACME</ORG>\r\n</FI>");
    }
}
