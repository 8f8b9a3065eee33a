mod saga_test;
