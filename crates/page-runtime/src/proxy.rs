//! The element proxy forwarding table.
//!
//! When the adapter replaces a source element with a canvas, user code
//! still holds the original reference. A fixed vocabulary of properties
//! and methods is forwarded from that reference to the canvas so the
//! page keeps working. The table lives here and is generated into the
//! injected script, so the JS side can never drift from it.

/// Properties forwarded as getter/setter pairs.
pub const FORWARDED_PROPERTIES: &[&str] = &[
    "textContent",
    "innerHTML",
    "innerText",
    "value",
    "style",
    "src",
    "classList",
    "className",
    "hidden",
    "attributes",
    "children",
    "childNodes",
    "firstChild",
    "firstElementChild",
    "lastChild",
    "lastElementChild",
    "dataset",
    "scrollTop",
    "scrollLeft",
    "scrollWidth",
    "scrollHeight",
    "offsetParent",
    "offsetTop",
    "offsetLeft",
    "offsetWidth",
    "offsetHeight",
    "clientWidth",
    "clientHeight",
    "clientTop",
    "clientLeft",
    "nodeName",
    "nodeType",
    "nodeValue",
];

/// Methods forwarded as bound calls on the canvas.
pub const FORWARDED_METHODS: &[&str] = &[
    "addEventListener",
    "removeEventListener",
    "append",
    "prepend",
    "appendChild",
    "replaceChild",
    "replaceChildren",
    "removeChild",
    "before",
    "insertBefore",
    "scroll",
    "scrollBy",
    "scrollIntoView",
    "scrollIntoViewIfNeeded",
    "matches",
    "closest",
    "getAttribute",
    "setAttribute",
    "removeAttribute",
    "hasAttribute",
    "toggleAttribute",
    "getAttributeNames",
    "cloneNode",
    "normalize",
    "getAnimations",
    "remove",
];

/// Media control methods that become no-ops on converted elements.
pub const NOOP_METHODS: &[&str] = &["play", "pause"];

/// Render the forwarding tables as a JS prelude consumed by the media
/// adapter.
pub fn to_js() -> String {
    format!(
        "window.____proxyProperties = {};\nwindow.____proxyMethods = {};\nwindow.____proxyNoops = {};\n",
        js_string_array(FORWARDED_PROPERTIES),
        js_string_array(FORWARDED_METHODS),
        js_string_array(NOOP_METHODS),
    )
}

fn js_string_array(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("\"{s}\"")).collect();
    format!("[{}]", quoted.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_have_no_duplicates() {
        for table in [FORWARDED_PROPERTIES, FORWARDED_METHODS, NOOP_METHODS] {
            let mut seen = std::collections::HashSet::new();
            for item in table {
                assert!(seen.insert(item), "duplicate table entry {item}");
            }
        }
    }

    #[test]
    fn noops_are_not_also_forwarded() {
        for noop in NOOP_METHODS {
            assert!(!FORWARDED_METHODS.contains(noop));
        }
    }

    #[test]
    fn generated_js_declares_all_three_tables() {
        let js = to_js();
        assert!(js.contains("____proxyProperties = [\"textContent\""));
        assert!(js.contains("____proxyMethods"));
        assert!(js.contains("\"play\""));
        assert!(js.contains("\"scrollIntoViewIfNeeded\""));
    }
}
