//! Shadow boundary that keeps the widget's markup and styles apart from the
//! embedding page.

use crate::dom::{DomError, DomHost, StyleSheetSource};

/// Attribute marking the inner container so a re-mount finds it again.
pub const CONTAINER_MARKER: &str = "data-shadow-container";

/// A mounted boundary. Rendering goes into [`container`](Self::container).
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowIsolationHost<N> {
    host: N,
    root: N,
    container: N,
}

impl<N: Clone + PartialEq + 'static> ShadowIsolationHost<N> {
    /// Attach (or reuse) the shadow root of `host` and make sure it holds
    /// exactly one inner container. Stylesheets are copied only when the
    /// container is created.
    pub fn mount<D: DomHost<Node = N>>(dom: &D, host: &N) -> Result<Self, DomError> {
        let root = match dom.shadow_root(host) {
            Some(root) => root,
            None => dom.attach_shadow(host)?,
        };

        let selector = format!("[{CONTAINER_MARKER}]");
        let container = match dom.query_selector(&root, &selector) {
            Some(container) => container,
            None => {
                let container = dom.create_element("div")?;
                dom.set_attribute(&container, CONTAINER_MARKER, "")?;
                dom.append_child(&root, &container)?;
                clone_stylesheets(dom, &root);
                container
            }
        };

        Ok(Self {
            host: host.clone(),
            root,
            container,
        })
    }

    pub fn host(&self) -> &N {
        &self.host
    }

    pub fn root(&self) -> &N {
        &self.root
    }

    pub fn container(&self) -> &N {
        &self.container
    }
}

/// Copy every document stylesheet into `root`. Failures skip the sheet.
fn clone_stylesheets<D: DomHost>(dom: &D, root: &D::Node) -> usize {
    let mut copied = 0;
    for sheet in dom.stylesheets() {
        let result = sheet.and_then(|sheet| match sheet {
            StyleSheetSource::External { href } => {
                let link = dom.create_element("link")?;
                dom.set_attribute(&link, "rel", "stylesheet")?;
                dom.set_attribute(&link, "href", &href)?;
                dom.append_child(root, &link)
            }
            StyleSheetSource::Inline { owner } => {
                let style = dom.clone_node(&owner)?;
                dom.append_child(root, &style)
            }
        });
        match result {
            Ok(()) => copied += 1,
            Err(error) => log::warn!("[ShadowHost] Could not clone stylesheet: {error}"),
        }
    }
    copied
}
