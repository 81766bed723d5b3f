mod emission_test;
