//! Tests for the HTTP front-end parser.

#[cfg(test)]
mod tests {
    use crate::proto::http::{parse, valid_key};
    use crate::proto::{ParserCtx, Step};

    fn argv(step: Step) -> (usize, Vec<Vec<u8>>) {
        match step {
            Step::Consumed { n, args } => {
                (n, (0..args.len()).map(|i| args.at(i).to_vec()).collect())
            }
            Step::Incomplete => panic!("expected a complete request"),
        }
    }

    fn words(argv: &[Vec<u8>]) -> Vec<String> {
        argv.iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    const NO_AUTH: ParserCtx<'static> = ParserCtx { auth: None };

    #[test]
    fn test_get() {
        let input = b"GET /foo HTTP/1.1\r\n\r\n";
        let (n, args) = argv(parse(input, &NO_AUTH).unwrap());
        assert_eq!(n, input.len());
        assert_eq!(words(&args), ["get", "foo"]);
    }

    #[test]
    fn test_put_with_query_options() {
        let input =
            b"PUT /foo?ex=5&flags=7 HTTP/1.1\r\nContent-Length: 3\r\n\r\nbar";
        let (n, args) = argv(parse(input, &NO_AUTH).unwrap());
        assert_eq!(n, input.len());
        assert_eq!(words(&args), ["set", "foo", "bar", "ex", "5", "flags", "7"]);
    }

    #[test]
    fn test_put_nx_xx_cas() {
        let input = b"PUT /k?cas=9&nx HTTP/1.1\r\nContent-Length: 1\r\n\r\nv";
        let (_, args) = argv(parse(input, &NO_AUTH).unwrap());
        assert_eq!(words(&args), ["set", "k", "v", "cas", "9", "nx"]);
    }

    #[test]
    fn test_delete() {
        let input = b"DELETE /foo HTTP/1.0\r\n\r\n";
        let (_, args) = argv(parse(input, &NO_AUTH).unwrap());
        assert_eq!(words(&args), ["del", "foo"]);
    }

    #[test]
    fn test_body_incomplete() {
        let input = b"PUT /foo HTTP/1.1\r\nContent-Length: 10\r\n\r\nbar";
        assert!(matches!(parse(input, &NO_AUTH).unwrap(), Step::Incomplete));
    }

    #[test]
    fn test_head_incomplete() {
        assert!(matches!(
            parse(b"GET /foo HTT", &NO_AUTH).unwrap(),
            Step::Incomplete
        ));
    }

    #[test]
    fn test_help_page() {
        let err = parse(b"GET / HTTP/1.1\r\n\r\n", &NO_AUTH).unwrap_err();
        assert_eq!(err.message, "Show Help TEXT");
        let err = parse(
            b"GET / HTTP/1.1\r\nAccept: text/html\r\n\r\n",
            &NO_AUTH,
        )
        .unwrap_err();
        assert_eq!(err.message, "Show Help HTML");
    }

    #[test]
    fn test_method_not_allowed() {
        let err = parse(b"POST /foo HTTP/1.1\r\n\r\n", &NO_AUTH).unwrap_err();
        assert_eq!(err.message, "Method Not Allowed");
    }

    #[test]
    fn test_invalid_key() {
        let err = parse(b"GET /a%20b HTTP/1.1\r\n\r\n", &NO_AUTH).unwrap_err();
        assert_eq!(err.message, "Invalid Key");
    }

    #[test]
    fn test_auth_required() {
        let ctx = ParserCtx {
            auth: Some("secret"),
        };
        let err = parse(b"GET /foo HTTP/1.1\r\n\r\n", &ctx).unwrap_err();
        assert_eq!(err.message, "Unauthorized");

        let input = b"GET /foo HTTP/1.1\r\nAuthorization: Bearer secret\r\n\r\n";
        let (_, args) = argv(parse(input, &ctx).unwrap());
        assert_eq!(words(&args), ["get", "foo"]);

        let input = b"GET /foo?auth=secret HTTP/1.1\r\n\r\n";
        let (_, args) = argv(parse(input, &ctx).unwrap());
        assert_eq!(words(&args), ["get", "foo"]);

        let err = parse(
            b"GET /foo HTTP/1.1\r\nAuthorization: Bearer wrong\r\n\r\n",
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.message, "Unauthorized");
    }

    #[test]
    fn test_valid_key() {
        assert!(valid_key(b"foo"));
        assert!(valid_key(b"user:42.profile"));
        assert!(!valid_key(b""));
        assert!(!valid_key(b"has space"));
        assert!(!valid_key(b"pct%20"));
        assert!(!valid_key(b"q?x"));
        assert!(!valid_key(&vec![b'a'; 251]));
    }
}
