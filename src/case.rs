//! Routing names are snake_case; controller classes are `<PascalName>Controller`.

/// `foo_bar` becomes `FooBarController`. Hyphens separate words too.
pub fn controller_class_name(name: &str) -> String {
    let mut class = String::with_capacity(name.len() + "Controller".len());
    for word in name.split(['_', '-']).filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            class.extend(first.to_uppercase());
            class.push_str(chars.as_str());
        }
    }
    class.push_str("Controller");
    class
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names() {
        assert_eq!(controller_class_name("root"), "RootController");
        assert_eq!(controller_class_name("foo_bar"), "FooBarController");
        assert_eq!(controller_class_name("a-b"), "ABController");
        assert_eq!(controller_class_name("__private"), "PrivateController");
    }
}
