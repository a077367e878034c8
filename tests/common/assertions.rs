/// Engine argv assertion utilities
#[allow(dead_code)]
pub fn assert_args_contain(args: &[String], flag: &str) {
    assert!(
        args.iter().any(|a| a == flag),
        "Expected engine args to contain '{}' but they didn't.\nArgs: {}",
        flag,
        args.join(" ")
    );
}

/// Check that an argument is NOT present
#[allow(dead_code)]
pub fn assert_args_not_contain(args: &[String], flag: &str) {
    assert!(
        !args.iter().any(|a| a == flag),
        "Expected engine args to NOT contain '{}' but they did.\nArgs: {}",
        flag,
        args.join(" ")
    );
}

/// Value following the first occurrence of `flag` (e.g. "18" for "-crf 18")
#[allow(dead_code)]
pub fn get_flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Check that a flag is followed by a specific value
#[allow(dead_code)]
pub fn assert_flag_value(args: &[String], flag: &str, expected: &str) {
    match get_flag_value(args, flag) {
        Some(value) => assert_eq!(
            value,
            expected,
            "Expected {} to be {} but got {}.\nArgs: {}",
            flag,
            expected,
            value,
            args.join(" ")
        ),
        None => panic!("Flag '{}' not found in args: {}", flag, args.join(" ")),
    }
}

/// All values passed with `-i`, in order
#[allow(dead_code)]
pub fn input_args(args: &[String]) -> Vec<&str> {
    args.windows(2)
        .filter(|w| w[0] == "-i")
        .map(|w| w[1].as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_get_flag_value() {
        let a = args("-i cover.jpg -i 01.mp3 -crf 18 -maxrate 10000k out.mp4");
        assert_eq!(get_flag_value(&a, "-crf"), Some("18"));
        assert_eq!(get_flag_value(&a, "-maxrate"), Some("10000k"));
        assert_eq!(get_flag_value(&a, "-nonexistent"), None);
        assert_eq!(input_args(&a), vec!["cover.jpg", "01.mp3"]);
    }

    #[test]
    #[should_panic(expected = "Expected engine args to contain")]
    fn test_assert_args_contain_fails() {
        assert_args_contain(&args("-i cover.jpg"), "-crf");
    }
}
