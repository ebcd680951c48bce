//! Execution context of the demo suite.

/// Context handed from each node to its children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemoContext {
    /// Display names of the enclosing nodes, outermost first.
    pub path: Vec<String>,
    /// Connection string opened by the database suite, if any.
    pub connection: Option<String>,
}

impl DemoContext {
    /// Returns a copy with `name` appended to the path.
    #[must_use]
    pub fn enter(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.path.push(name.to_owned());
        next
    }

    /// Returns the path joined with `/`.
    #[must_use]
    pub fn location(&self) -> String {
        self.path.join("/")
    }
}
