pub mod fanmtl;
