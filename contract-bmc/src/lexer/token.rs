//! Token definitions

use logos::Logos;

/// Java/JML token
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token {
    // Keywords
    #[token("abstract")]
    Abstract,
    #[token("assert")]
    Assert,
    #[token("break")]
    Break,
    #[token("catch")]
    Catch,
    #[token("class")]
    Class,
    #[token("continue")]
    Continue,
    #[token("default")]
    Default,
    #[token("do")]
    Do,
    #[token("else")]
    Else,
    #[token("extends")]
    Extends,
    #[token("final")]
    Final,
    #[token("finally")]
    Finally,
    #[token("for")]
    For,
    #[token("if")]
    If,
    #[token("implements")]
    Implements,
    #[token("import")]
    Import,
    #[token("instanceof")]
    InstanceOf,
    #[token("interface")]
    Interface,
    #[token("native")]
    Native,
    #[token("new")]
    New,
    #[token("null")]
    Null,
    #[token("package")]
    Package,
    #[token("private")]
    Private,
    #[token("protected")]
    Protected,
    #[token("public")]
    Public,
    #[token("return")]
    Return,
    #[token("static")]
    Static,
    #[token("super")]
    Super,
    #[token("synchronized")]
    Synchronized,
    #[token("this")]
    This,
    #[token("throw")]
    Throw,
    #[token("throws")]
    Throws,
    #[token("transient")]
    Transient,
    #[token("try")]
    Try,
    #[token("void")]
    Void,
    #[token("volatile")]
    Volatile,
    #[token("while")]
    While,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Primitive types
    #[token("boolean")]
    TyBoolean,
    #[token("byte")]
    TyByte,
    #[token("short")]
    TyShort,
    #[token("char")]
    TyChar,
    #[token("int")]
    TyInt,
    #[token("long")]
    TyLong,
    #[token("float")]
    TyFloat,
    #[token("double")]
    TyDouble,

    // Literals
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?[dD]?", parse_float)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+[dD]?", parse_float)]
    #[regex(r"[0-9][0-9_]*[dD]", parse_float)]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?[dD]?", parse_float)]
    DoubleLit(f64),

    #[regex(r"[0-9][0-9_]*(\.[0-9][0-9_]*)?([eE][+-]?[0-9]+)?[fF]", parse_float)]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?[fF]", parse_float)]
    FloatLit(f64),

    #[regex(r"0[xX][0-9a-fA-F][0-9a-fA-F_]*", |lex| {
        // hex int literals denote 32-bit patterns
        u32::from_str_radix(&lex.slice()[2..].replace('_', ""), 16).ok().map(|v| v as i32 as i64)
    })]
    #[regex(r"0[bB][01][01_]*", |lex| {
        u32::from_str_radix(&lex.slice()[2..].replace('_', ""), 2).ok().map(|v| v as i32 as i64)
    })]
    #[regex(r"[0-9][0-9_]*", |lex| lex.slice().replace('_', "").parse::<i64>().ok())]
    IntLit(i64),

    #[regex(r"0[xX][0-9a-fA-F][0-9a-fA-F_]*[lL]", |lex| {
        let s = lex.slice();
        u64::from_str_radix(&s[2..s.len() - 1].replace('_', ""), 16).ok().map(|v| v as i64)
    })]
    #[regex(r"[0-9][0-9_]*[lL]", |lex| {
        let s = lex.slice();
        s[..s.len() - 1].replace('_', "").parse::<i64>().ok()
    })]
    LongLit(i64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len() - 1])
    })]
    StringLit(String),

    #[regex(r"'([^'\\\n]|\\.|\\u[0-9a-fA-F]{4})'", |lex| {
        let s = lex.slice();
        let text = unescape(&s[1..s.len() - 1])?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    })]
    CharLit(char),

    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// JML backslash keyword without the backslash (`result`, `old`, `forall`, ...)
    #[regex(r"\\[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Backslash(String),

    // JML region markers produced by the preprocessor
    #[token("@{")]
    JmlOpen,
    #[token("@}")]
    JmlClose,

    // Symbols
    #[token("@")]
    At,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("...")]
    Ellipsis,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    // Assignment
    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    ShlEq,

    // Comparison. `>>`, `>>>`, `>>=` and `>>>=` are assembled by the parser
    // from adjacent `>` tokens so that nested generics close cleanly.
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,

    // Operators
    #[token("&&")]
    AndAnd,
    #[token("||")]
    PipePipe,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("<<")]
    Shl,

    // JML logical operators
    #[token("==>")]
    Implies,
    #[token("<==")]
    RevImplies,
    #[token("<==>")]
    Equiv,
    #[token("<=!=>")]
    NotEquiv,
}

fn parse_float(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    let text = lex.slice().replace('_', "");
    text.trim_end_matches(['f', 'F', 'd', 'D']).parse::<f64>().ok()
}

/// Resolve Java escape sequences; `None` on an invalid escape
fn unescape(inner: &str) -> Option<String> {
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        let escaped = match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            '0' => '\0',
            's' => ' ',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?
            }
            _ => return None,
        };
        result.push(escaped);
    }
    Some(result)
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Token::Abstract => "abstract",
            Token::Assert => "assert",
            Token::Break => "break",
            Token::Catch => "catch",
            Token::Class => "class",
            Token::Continue => "continue",
            Token::Default => "default",
            Token::Do => "do",
            Token::Else => "else",
            Token::Extends => "extends",
            Token::Final => "final",
            Token::Finally => "finally",
            Token::For => "for",
            Token::If => "if",
            Token::Implements => "implements",
            Token::Import => "import",
            Token::InstanceOf => "instanceof",
            Token::Interface => "interface",
            Token::Native => "native",
            Token::New => "new",
            Token::Null => "null",
            Token::Package => "package",
            Token::Private => "private",
            Token::Protected => "protected",
            Token::Public => "public",
            Token::Return => "return",
            Token::Static => "static",
            Token::Super => "super",
            Token::Synchronized => "synchronized",
            Token::This => "this",
            Token::Throw => "throw",
            Token::Throws => "throws",
            Token::Transient => "transient",
            Token::Try => "try",
            Token::Void => "void",
            Token::Volatile => "volatile",
            Token::While => "while",
            Token::True => "true",
            Token::False => "false",
            Token::TyBoolean => "boolean",
            Token::TyByte => "byte",
            Token::TyShort => "short",
            Token::TyChar => "char",
            Token::TyInt => "int",
            Token::TyLong => "long",
            Token::TyFloat => "float",
            Token::TyDouble => "double",
            Token::DoubleLit(v) => return write!(f, "{v}"),
            Token::FloatLit(v) => return write!(f, "{v}f"),
            Token::IntLit(n) => return write!(f, "{n}"),
            Token::LongLit(n) => return write!(f, "{n}L"),
            Token::StringLit(s) => return write!(f, "\"{s}\""),
            Token::CharLit(c) => return write!(f, "'{c}'"),
            Token::Ident(s) => return write!(f, "{s}"),
            Token::Backslash(s) => return write!(f, "\\{s}"),
            Token::JmlOpen => "/*@",
            Token::JmlClose => "@*/",
            Token::At => "@",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Semi => ";",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Ellipsis => "...",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Eq => "=",
            Token::PlusEq => "+=",
            Token::MinusEq => "-=",
            Token::StarEq => "*=",
            Token::SlashEq => "/=",
            Token::PercentEq => "%=",
            Token::AmpEq => "&=",
            Token::PipeEq => "|=",
            Token::CaretEq => "^=",
            Token::ShlEq => "<<=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::AndAnd => "&&",
            Token::PipePipe => "||",
            Token::Bang => "!",
            Token::Tilde => "~",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::PlusPlus => "++",
            Token::MinusMinus => "--",
            Token::Shl => "<<",
            Token::Implies => "==>",
            Token::RevImplies => "<==",
            Token::Equiv => "<==>",
            Token::NotEquiv => "<=!=>",
        };
        write!(f, "{text}")
    }
}
