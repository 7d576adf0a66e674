use crate::render::RenderError;

/// Named document templates. Both expose the same slots and macros
/// (`\cvsection`, `\cventry`) and differ only in layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Classic,
    Compact,
}

impl Template {
    pub fn from_name(name: &str) -> Result<Self, RenderError> {
        match name.trim().to_lowercase().as_str() {
            "classic" => Ok(Template::Classic),
            "compact" => Ok(Template::Compact),
            other => Err(RenderError::UnknownTemplate(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Template::Classic => "classic",
            Template::Compact => "compact",
        }
    }

    /// Skeleton with `<<header>>` and `<<body>>` slots. The preamble drops the trailer
/// `/ID`, the info dates and the `PTEX.*` keys so identical input gives identical bytes.
    pub fn skeleton(&self) -> &'static str {
        match self {
            Template::Classic => CLASSIC,
            Template::Compact => COMPACT,
        }
    }
}

const CLASSIC: &str = r"\documentclass[letterpaper,11pt]{article}
\pdftrailerid{}
\pdfinfoomitdate=1
\pdfsuppressptexinfo=-1
\usepackage[margin=0.75in]{geometry}
\usepackage[hidelinks]{hyperref}
\usepackage{enumitem}
\pdfgentounicode=1
\pagestyle{empty}
\setlength{\parindent}{0pt}
\setlist[itemize]{leftmargin=1.2em,itemsep=1pt,topsep=2pt}
\newcommand{\cvsection}[1]{\vspace{6pt}{\large\scshape #1}\par\vspace{-2pt}\hrule\vspace{4pt}}
\newcommand{\cventry}[4]{\textbf{#1}\hfill #3\par\textit{#2}\hfill #4\par}

\begin{document}
<<header>>
<<body>>
\end{document}
";

const COMPACT: &str = r"\documentclass[letterpaper,10pt]{article}
\pdftrailerid{}
\pdfinfoomitdate=1
\pdfsuppressptexinfo=-1
\usepackage[margin=0.5in]{geometry}
\usepackage[hidelinks]{hyperref}
\usepackage{enumitem}
\pdfgentounicode=1
\pagestyle{empty}
\setlength{\parindent}{0pt}
\setlist[itemize]{leftmargin=1em,itemsep=0pt,topsep=1pt,parsep=0pt}
\newcommand{\cvsection}[1]{\vspace{3pt}{\bfseries\uppercase{#1}}\par\hrule\vspace{2pt}}
\newcommand{\cventry}[4]{\textbf{#1} \textit{#2}\hfill #3\quad #4\par}

\begin{document}
\small
<<header>>
<<body>>
\end{document}
";
