//! Tests for the RESP parsers.

#[cfg(test)]
mod tests {
    use crate::proto::resp::{parse, parse_inline};
    use crate::proto::Step;

    fn consumed(step: Step) -> (usize, Vec<Vec<u8>>) {
        match step {
            Step::Consumed { n, args } => {
                let argv = (0..args.len()).map(|i| args.at(i).to_vec()).collect();
                (n, argv)
            }
            Step::Incomplete => panic!("expected a complete command"),
        }
    }

    #[test]
    fn test_binary_command() {
        let input = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        let (n, argv) = consumed(parse(input).unwrap());
        assert_eq!(n, input.len());
        assert_eq!(argv, vec![b"GET".to_vec(), b"foo".to_vec()]);
    }

    #[test]
    fn test_binary_pipeline_consumes_one() {
        let input = b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        let (n, argv) = consumed(parse(input).unwrap());
        assert_eq!(n, 14);
        assert_eq!(argv, vec![b"PING".to_vec()]);
        let (n2, argv2) = consumed(parse(&input[n..]).unwrap());
        assert_eq!(n2, input.len() - 14);
        assert_eq!(argv2, vec![b"GET".to_vec(), b"foo".to_vec()]);
    }

    #[test]
    fn test_binary_partial() {
        let input = b"*2\r\n$3\r\nGET\r\n$3\r\nfo";
        assert!(matches!(parse(input).unwrap(), Step::Incomplete));
        assert!(matches!(parse(b"*").unwrap(), Step::Incomplete));
        assert!(matches!(parse(b"*2\r\n").unwrap(), Step::Incomplete));
    }

    #[test]
    fn test_binary_bad_length() {
        assert!(parse(b"*abc\r\n").is_err());
        assert!(parse(b"*1\r\n$-1\r\nx\r\n").is_err());
        assert!(parse(b"*1\r\nx3\r\nfoo\r\n").is_err());
    }

    #[test]
    fn test_binary_binary_safe_values() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\na\r\nb\x00\r\n";
        let (n, argv) = consumed(parse(input).unwrap());
        assert_eq!(n, input.len());
        assert_eq!(argv[2], b"a\r\nb\x00".to_vec());
    }

    #[test]
    fn test_inline_simple() {
        let (n, argv) = consumed(parse_inline(b"SET foo bar\r\n").unwrap());
        assert_eq!(n, 13);
        assert_eq!(argv, vec![b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()]);
    }

    #[test]
    fn test_inline_quotes_and_escapes() {
        let (_, argv) = consumed(parse_inline(b"SET k \"a b\"\r\n").unwrap());
        assert_eq!(argv[2], b"a b".to_vec());
        let (_, argv) = consumed(parse_inline(b"SET k 'x y'\r\n").unwrap());
        assert_eq!(argv[2], b"x y".to_vec());
        let (_, argv) = consumed(parse_inline(b"SET k \"a\\r\\n\\tb\"\r\n").unwrap());
        assert_eq!(argv[2], b"a\r\n\tb".to_vec());
    }

    #[test]
    fn test_inline_unbalanced_quotes() {
        assert!(parse_inline(b"SET k \"oops\r\n").is_err());
        assert!(parse_inline(b"SET k \"a\"b\r\n").is_err());
    }

    #[test]
    fn test_inline_empty_line() {
        let (n, argv) = consumed(parse_inline(b"\r\n").unwrap());
        assert_eq!(n, 2);
        assert!(argv.is_empty());
    }

    #[test]
    fn test_inline_partial() {
        assert!(matches!(parse_inline(b"SET foo ba").unwrap(), Step::Incomplete));
    }
}
