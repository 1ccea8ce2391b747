use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// Frames of the capture machinery itself, skipped from every stack.
const SKIP_FRAMES: usize = 2;

/// Deepest stack we retain. Allocation sites rarely need more context and
/// every retained frame costs memory per recorded instance.
const MAX_DEPTH: usize = 32;

/// An allocation call stack, captured on the hot path as raw instruction
/// pointers and symbolized only on demand.
///
/// Identity (equality and hashing) is by frame address, so two allocations
/// from the same call site group together without ever paying for symbol
/// resolution. Clones share the underlying frame storage.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct CallStack {
    frames: Arc<[usize]>,
}

impl CallStack {
    /// Captures the current call stack.
    ///
    /// Only raw instruction pointers are collected; nothing is symbolized
    /// here.
    #[must_use]
    pub fn capture() -> Self {
        let mut frames = Vec::with_capacity(MAX_DEPTH);
        let mut skip = SKIP_FRAMES;

        backtrace::trace(|frame| {
            if skip > 0 {
                skip = skip.saturating_sub(1);
                return true;
            }
            if frames.len() >= MAX_DEPTH {
                return false;
            }
            frames.push(frame.ip().addr());
            true
        });

        Self {
            frames: frames.into(),
        }
    }

    /// Number of retained frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Symbolizes the retained frames, outermost last.
    ///
    /// Frames the symbol table cannot resolve render as `<unknown>`.
    #[must_use]
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.frames
            .iter()
            .map(|ip| resolve_frame(*ip))
            .collect()
    }
}

impl fmt::Debug for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallStack")
            .field("depth", &self.frames.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, frame) in self.frames().iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "  at {frame}")?;
        }
        Ok(())
    }
}

/// One symbolized stack frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameInfo {
    function: String,
    file: Option<String>,
    line: Option<u32>,
}

impl FrameInfo {
    /// The demangled function name, or `<unknown>`.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Source file, when debug info is available.
    #[must_use]
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// Source line, when debug info is available.
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function)?;
        if let Some(file) = &self.file {
            write!(f, " ({file}")?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

// Output depends on the debug info present in the build environment.
#[cfg_attr(test, mutants::skip)]
fn resolve_frame(ip: usize) -> FrameInfo {
    let mut function = None;
    let mut file = None;
    let mut line = None;

    backtrace::resolve(ip as *mut c_void, |symbol| {
        if function.is_none() {
            function = symbol.name().map(|name| name.to_string());
        }
        if file.is_none() {
            file = symbol
                .filename()
                .and_then(|path| path.to_str())
                .map(str::to_string);
        }
        if line.is_none() {
            line = symbol.lineno();
        }
    });

    FrameInfo {
        function: function.unwrap_or_else(|| "<unknown>".to_string()),
        file,
        line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_retains_frames() {
        let stack = CallStack::capture();
        assert!(stack.depth() > 0);
        assert!(stack.depth() <= MAX_DEPTH);
    }

    #[test]
    fn clones_share_identity() {
        let stack = CallStack::capture();
        let clone = stack.clone();

        assert_eq!(stack, clone);
    }

    #[test]
    fn distinct_call_sites_differ() {
        // Captured on different lines, so the innermost frame differs.
        #[inline(never)]
        fn here() -> CallStack {
            CallStack::capture()
        }
        #[inline(never)]
        fn there() -> CallStack {
            CallStack::capture()
        }

        // Equal stacks would mean we captured nothing below the helpers.
        assert_ne!(here(), there());
    }

    // The type is thread-safe.
    static_assertions::assert_impl_all!(CallStack: Send, Sync);
}
