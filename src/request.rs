//! Request typing and context derivation.

use bitflags::bitflags;

use crate::url::UrlView;

bitflags! {
    /// Resource-type bits. Rules store a mask; a request carries one bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeMask: u16 {
        const MAIN_FRAME = 1 << 0;
        const SUB_FRAME  = 1 << 1;
        const STYLESHEET = 1 << 2;
        const SCRIPT     = 1 << 3;
        const IMAGE      = 1 << 4;
        const FONT       = 1 << 5;
        const OBJECT     = 1 << 6;
        const XHR        = 1 << 7;
        const PING       = 1 << 8;
        const MEDIA      = 1 << 9;
        const WEBSOCKET  = 1 << 10;
        const OTHER      = 1 << 11;
    }
}

impl TypeMask {
    /// Both document types.
    pub const DOCUMENT: TypeMask = TypeMask::MAIN_FRAME.union(TypeMask::SUB_FRAME);

    /// Default mask for untyped blocking rules: everything except the
    /// top-level document, which requires an explicit `document` type.
    pub const DEFAULT_NETWORK: TypeMask = TypeMask::all().difference(TypeMask::MAIN_FRAME);

    /// Map a host-provided type name to its bit. Unknown names are `other`.
    pub fn from_type_name(name: &str) -> TypeMask {
        match name {
            "main_frame" => TypeMask::MAIN_FRAME,
            "sub_frame" => TypeMask::SUB_FRAME,
            "stylesheet" => TypeMask::STYLESHEET,
            "script" => TypeMask::SCRIPT,
            "image" => TypeMask::IMAGE,
            "font" => TypeMask::FONT,
            "object" => TypeMask::OBJECT,
            "xmlhttprequest" => TypeMask::XHR,
            "ping" => TypeMask::PING,
            "media" => TypeMask::MEDIA,
            "websocket" => TypeMask::WEBSOCKET,
            _ => TypeMask::OTHER,
        }
    }
}

bitflags! {
    /// Party relationship between request and document origin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PartyMask: u8 {
        const FIRST = 1 << 0;
        const THIRD = 1 << 1;
    }
}

bitflags! {
    /// URL scheme bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SchemeMask: u8 {
        const HTTP  = 1 << 0;
        const HTTPS = 1 << 1;
        const WS    = 1 << 2;
        const WSS   = 1 << 3;
        const OTHER = 1 << 4;
    }
}

impl SchemeMask {
    pub fn from_scheme(scheme: &str) -> SchemeMask {
        if scheme.eq_ignore_ascii_case("https") {
            SchemeMask::HTTPS
        } else if scheme.eq_ignore_ascii_case("http") {
            SchemeMask::HTTP
        } else if scheme.eq_ignore_ascii_case("wss") {
            SchemeMask::WSS
        } else if scheme.eq_ignore_ascii_case("ws") {
            SchemeMask::WS
        } else {
            SchemeMask::OTHER
        }
    }
}

/// Everything the pipelines need to know about one request, derived once.
pub struct RequestContext<'a> {
    pub url: &'a str,
    pub view: UrlView<'a>,
    pub req_host: &'a str,
    pub req_etld1: &'a str,
    pub doc_host: &'a str,
    pub doc_etld1: &'a str,
    pub type_bit: TypeMask,
    pub party_bit: PartyMask,
    pub scheme_bit: SchemeMask,
    pub tab_id: i32,
    pub frame_id: i32,
    pub request_id: u64,
}

impl<'a> RequestContext<'a> {
    /// Derive a context from raw host inputs. `etld1` resolves registrable
    /// domains (PSL view of the active snapshot).
    ///
    /// For main-frame requests without an initiator, the document is the
    /// request itself.
    #[allow(clippy::too_many_arguments)]
    pub fn derive(
        url: &'a str,
        type_name: &str,
        initiator: Option<&'a str>,
        tab_id: i32,
        frame_id: i32,
        request_id: u64,
        etld1: impl Fn(&'a str) -> &'a str,
    ) -> Option<Self> {
        let view = UrlView::parse(url)?;
        let req_host = view.host().trim_end_matches('.');
        let req_etld1 = etld1(req_host);

        let doc_host = initiator
            .and_then(UrlView::parse)
            .map(|v| v.host().trim_end_matches('.'))
            .unwrap_or(req_host);
        let doc_etld1 = etld1(doc_host);

        let party_bit = if !doc_etld1.is_empty()
            && !req_etld1.is_empty()
            && !doc_etld1.eq_ignore_ascii_case(req_etld1)
        {
            PartyMask::THIRD
        } else {
            PartyMask::FIRST
        };

        Some(Self {
            url,
            view,
            req_host,
            req_etld1,
            doc_host,
            doc_etld1,
            type_bit: TypeMask::from_type_name(type_name),
            party_bit,
            scheme_bit: SchemeMask::from_scheme(view.scheme()),
            tab_id,
            frame_id,
            request_id,
        })
    }

    /// True for main-frame and sub-frame requests.
    pub fn is_document(&self) -> bool {
        TypeMask::DOCUMENT.contains(self.type_bit)
    }
}
