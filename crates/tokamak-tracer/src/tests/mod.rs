mod helpers;

mod stacktrace_tests;
